//! Helper utilities for driving streams in tests

use anyhow::{bail, Result};
use keystream_core::{Stream, StreamMode};

/// Opens `stream` with `mode`, writes `data` and closes it
pub fn write_stream(stream: &mut dyn Stream, mode: &str, data: &[u8]) -> Result<()> {
    if !stream.open(StreamMode::parse(mode)?)? {
        bail!("Stream refused to open with mode {}", mode);
    }
    match stream.write(data)? {
        Some(written) if written == data.len() => {}
        other => bail!("Short write: {:?} of {} bytes", other, data.len()),
    }
    if !stream.close()? {
        bail!("Stream was not open at close");
    }
    Ok(())
}

/// Reads from an open stream until it reports end of data
pub fn read_remaining(stream: &mut dyn Stream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.read(8192)? {
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Opens `stream` for reading, reads everything and closes it
pub fn read_stream(stream: &mut dyn Stream) -> Result<Vec<u8>> {
    if !stream.open(StreamMode::parse("rb")?)? {
        bail!("Stream refused to open for reading");
    }
    let data = read_remaining(stream)?;
    stream.close()?;
    Ok(data)
}
