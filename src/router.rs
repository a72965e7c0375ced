//! Request classification.

use std::fmt;

use crate::http::{Destination, Request};

/// How an intercepted GET is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
  /// Cache-first into the dynamic partition
  Image,
  /// Network-first, JSON error when nothing is cached
  Api,
  /// Network-first, offline document when nothing is cached
  Page,
  /// Cache-first into the static partition
  Static,
}

impl Strategy {
  /// Pick the strategy for a request. First match wins: image destination,
  /// `/api/` path, document destination, everything else.
  pub fn classify(request: &Request) -> Self {
    if request.destination == Destination::Image {
      Self::Image
    } else if request.path().starts_with("/api/") {
      Self::Api
    } else if request.destination == Destination::Document {
      Self::Page
    } else {
      Self::Static
    }
  }

  pub fn is_cache_first(self) -> bool {
    matches!(self, Self::Image | Self::Static)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Image => "image",
      Self::Api => "api",
      Self::Page => "page",
      Self::Static => "static",
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Route an intercepted request. `None` means pass it through untouched,
/// which is what happens to every non-GET.
pub fn route(request: &Request) -> Option<Strategy> {
  request.is_get().then(|| Strategy::classify(request))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn request(path: &str, destination: Destination) -> Request {
    let url = Url::parse("https://example.com").unwrap().join(path).unwrap();
    Request::get(url, destination)
  }

  #[test]
  fn test_image_wins_over_api_path() {
    let req = request("/api/avatar.png", Destination::Image);
    assert_eq!(Strategy::classify(&req), Strategy::Image);
  }

  #[test]
  fn test_api_wins_over_document() {
    let req = request("/api/contact", Destination::Document);
    assert_eq!(Strategy::classify(&req), Strategy::Api);
  }

  #[test]
  fn test_api_prefix_needs_trailing_slash() {
    assert_eq!(
      Strategy::classify(&request("/api", Destination::Other)),
      Strategy::Static
    );
    assert_eq!(
      Strategy::classify(&request("/apidocs", Destination::Document)),
      Strategy::Page
    );
  }

  #[test]
  fn test_document_is_page() {
    let req = request("/about", Destination::Document);
    assert_eq!(Strategy::classify(&req), Strategy::Page);
  }

  #[test]
  fn test_everything_else_is_static() {
    for destination in [
      Destination::Script,
      Destination::Style,
      Destination::Font,
      Destination::Other,
    ] {
      let req = request("/fonts/Stinger-Bold.ttf", destination);
      assert_eq!(Strategy::classify(&req), Strategy::Static);
    }
  }

  #[test]
  fn test_classification_is_deterministic() {
    let destinations = [
      Destination::Document,
      Destination::Image,
      Destination::Script,
      Destination::Style,
      Destination::Font,
      Destination::Other,
    ];
    let paths = ["/", "/about", "/api/contact", "/api/", "/company.jpg", "/_next/app.js"];

    for destination in destinations {
      for path in paths {
        let req = request(path, destination);
        let first = Strategy::classify(&req);
        let again = Strategy::classify(&req.clone());
        assert_eq!(first, again, "{} {:?}", path, destination);
      }
    }
  }

  #[test]
  fn test_non_get_passes_through() {
    let mut req = request("/api/contact", Destination::Other);
    req.method = Method::POST;
    assert_eq!(route(&req), None);

    req.method = Method::GET;
    assert_eq!(route(&req), Some(Strategy::Api));
  }

  #[test]
  fn test_cache_first_strategies() {
    assert!(Strategy::Image.is_cache_first());
    assert!(Strategy::Static.is_cache_first());
    assert!(!Strategy::Api.is_cache_first());
    assert!(!Strategy::Page.is_cache_first());
  }
}
