//! Utility functions for common operations.
//!
//! - **URL validation**: scheme checks before handing permalinks to the
//!   system opener, and origin extraction for entry source links
//! - **Text processing**: sanitizing and truncating upstream text for
//!   notification lines
//!
//! # Examples
//!
//! ```
//! use feedwatch::util::{notification_text, site_origin};
//!
//! assert_eq!(
//!     site_origin("https://example.com/2024/post").as_deref(),
//!     Some("https://example.com")
//! );
//! assert_eq!(notification_text("Big\nnews", 80), "Big news");
//! ```

mod text;
mod url_validator;

pub use text::{notification_text, truncate_to_width};
pub use url_validator::{site_origin, validate_url_for_open, UrlValidationError};

/// Display width notification titles are truncated to.
pub const MAX_NOTIFICATION_TITLE_WIDTH: usize = 120;
