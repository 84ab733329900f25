//! Request construction: typed options, body encoding, query building and
//! header decoration.

pub mod body;
pub mod decorate;
pub mod multipart;
pub mod options;
pub mod query;

pub use body::{BodyError, BodyKind, BodyMode, BodySource, BuiltRequest};
pub use decorate::{DecorateError, OriginHeader, decorate};
pub use options::{BasicAuth, FileUpload, RequestOptions};
