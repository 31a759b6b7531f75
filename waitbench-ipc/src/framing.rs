//! Length-Prefixed Frame Encoding
//!
//! Message boundaries over stream pipes (fd 3/4 or stdin/stdout), plus the
//! in-memory form used when a call crosses the distributed pool boundary.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Maximum frame size (1 MB). Wait-task traffic is tiny; anything larger is a bug.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    /// Reading or writing the stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be archived
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Bytes failed validation or could not be turned back into a message
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Announced or encoded size
        size: usize,
        /// Limit in force
        max: usize,
    },

    /// The frame is structurally wrong, e.g. empty
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The peer closed the stream between frames
    #[error("End of stream")]
    EndOfStream,
}

impl FrameError {
    /// Whether the error happened while converting a value to or from bytes,
    /// as opposed to moving the bytes.
    pub fn is_codec(&self) -> bool {
        matches!(
            self,
            FrameError::Serialization(_) | FrameError::Deserialization(_)
        )
    }
}

/// Serialize a message into an aligned byte buffer.
pub fn encode<T>(message: &T) -> Result<AlignedVec, FrameError>
where
    T: Serialize<AllocSerializer<256>>,
{
    let bytes =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(bytes)
}

/// Validate and deserialize a message from bytes.
///
/// The input does not need to be aligned; it is copied into an aligned buffer
/// when necessary.
pub fn decode<T>(bytes: &[u8]) -> Result<T, FrameError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    if bytes.is_empty() {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }

    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let archived = rkyv::check_archived_root::<T>(&aligned)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    let value: T = archived
        .deserialize(&mut Infallible)
        .expect("infallible deserialization");

    Ok(value)
}

/// Write a message with length prefix to a writer
///
/// Frame format:
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let bytes = encode(message)?;

    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    // The peer blocks on this frame; never leave it sitting in the buffer.
    writer.flush()?;

    Ok(())
}

/// Read a message with length prefix from a reader
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::EndOfStream);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }

    let mut buf = AlignedVec::with_capacity(len);
    buf.resize(len, 0);
    reader.read_exact(&mut buf)?;

    decode(&buf)
}

/// Frame writer wrapper for convenient message sending
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(8 * 1024, writer),
        }
    }

    /// Write a message
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.writer, message)
    }
}

/// Frame reader wrapper for convenient message receiving
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(8 * 1024, reader),
        }
    }

    /// Read a message
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.reader)
    }

    /// Check if the buffer has any data available
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RemoteCall, SupervisorCommand, WorkerMessage};
    use std::io::Cursor;

    #[test]
    fn test_frame_sequence_over_stream() {
        let commands = vec![
            SupervisorCommand::Run {
                task_id: 0,
                duration_secs: 1.0,
            },
            SupervisorCommand::Ping,
            SupervisorCommand::Shutdown,
        ];

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for cmd in &commands {
                writer.write(cmd).unwrap();
            }
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        match reader.read::<SupervisorCommand>().unwrap() {
            SupervisorCommand::Run {
                task_id,
                duration_secs,
            } => {
                assert_eq!(task_id, 0);
                assert_eq!(duration_secs, 1.0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(matches!(
            reader.read::<SupervisorCommand>().unwrap(),
            SupervisorCommand::Ping
        ));
        assert!(matches!(
            reader.read::<SupervisorCommand>().unwrap(),
            SupervisorCommand::Shutdown
        ));
    }

    #[test]
    fn test_end_of_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let result: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::EndOfStream)));
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_le_bytes());
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let result: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_zero_length_frame_rejected() {
        let mut reader = FrameReader::new(Cursor::new(0u32.to_le_bytes().to_vec()));
        let result: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::InvalidFrame(_))));
    }

    #[test]
    fn test_decode_garbage_is_codec_error() {
        let garbage = [0xffu8; 3];
        let err = decode::<RemoteCall>(&garbage).unwrap_err();
        assert!(err.is_codec(), "got {err:?}");
    }

    #[test]
    fn test_decode_unaligned_slice() {
        let bytes = encode(&RemoteCall::Wait {
            task_id: 7,
            duration_secs: 0.25,
        })
        .unwrap();

        // Shift by one byte to force a misaligned view.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let call: RemoteCall = decode(&shifted[1..]).unwrap();
        assert!(matches!(call, RemoteCall::Wait { task_id: 7, .. }));
    }
}
