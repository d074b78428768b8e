//! HTTP protocol layer module
//!
//! Response buffering, router-owned error responses, cookies and the
//! content types used by the context's response helpers.

pub mod cookie;
pub mod mime;
pub mod proxy;
pub mod response;

// Re-export commonly used types
pub use cookie::{Cookie, SameSite};
pub use response::{
    build_400_response, build_404_response, build_405_response, build_413_response,
    ResponseWriter,
};
