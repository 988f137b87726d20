pub use crate::http::build_router;
pub use crate::http::ApiDoc;
