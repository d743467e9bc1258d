mod category;
mod ingest_record;
mod result;
mod sink;

pub use category::*;
pub use ingest_record::*;
pub use result::*;
pub use sink::*;
