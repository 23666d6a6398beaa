//! URL validation shared by OPML import and source creation.
//!
//! Rejects non-HTTP schemes, localhost and private address ranges so that
//! user-supplied feed URLs cannot be used to probe internal services.
//!
//! ```
//! use feedrelay::util::validate_url;
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//! assert!(validate_url("http://localhost/feed").is_err());
//! ```

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
