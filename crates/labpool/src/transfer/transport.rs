use tokio_util::codec::length_delimited::{Builder, LengthDelimitedCodec};

pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

pub(crate) fn make_protocol_builder() -> Builder {
    *LengthDelimitedCodec::builder()
        .little_endian()
        .max_frame_length(MAX_FRAME_SIZE)
}
