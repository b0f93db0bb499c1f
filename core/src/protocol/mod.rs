mod decoder;
mod event;

pub use decoder::LineDecoder;
pub use event::{parse_record, ContentBlock, ResultRecord, StreamRecord};
