pub mod header;
pub mod block;
pub mod io_stream;
pub mod convert;

pub use header::{decode_header, HeaderAnomaly, HeaderError, Role, SmdHeader, Strictness, HEADER_SIZE};
pub use block::{deinterleave_block, deinterleave_into, BLOCK_SIZE};
pub use io_stream::{process, process_logged, ConvertError, ConvertReport, Options, SmdReader, Warning};
