//! Quantized model container
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "ICQ8" | version u16 | reserved u16
//! metadata_len u64 | metadata (JSON) | metadata_crc u32
//! tensor_count u32
//! per tensor:
//!   name_len u16 | name (UTF-8) | rank u8 | dims u32 * rank
//!   scale f32 | zero_point u8 | data_len u64 | data | data_crc u32
//! ```
//!
//! The CRC32 of each payload is checked on read.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quantize::{dequantize, QuantParams};
use crate::dataset::burn_dataset::{INPUT_MEAN, INPUT_STD};
use crate::model::ImageClassifierConfig;
use crate::utils::error::{ClassifierError, Result};

/// File magic
pub const MAGIC: &[u8; 4] = b"ICQ8";

/// Current container version
pub const FORMAT_VERSION: u16 = 1;

/// How a deployed model expects its input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Square side length in pixels
    pub image_size: usize,
    /// Channel count (RGB)
    pub channels: usize,
    /// Element type fed by the caller
    pub dtype: String,
    /// Normalization applied before the first layer: `(x - mean) / std`
    pub mean: f32,
    pub std: f32,
}

impl InputSpec {
    /// RGB uint8 input normalized to [-1, 1]
    pub fn uint8_rgb(image_size: usize) -> Self {
        Self {
            image_size,
            channels: 3,
            dtype: "uint8".to_string(),
            mean: INPUT_MEAN,
            std: INPUT_STD,
        }
    }
}

/// Everything needed to rebuild and use the model besides its weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Architecture the weights belong to
    pub model: ImageClassifierConfig,
    /// Output `i` is `class_names[i]`
    pub class_names: Vec<String>,
    pub input: InputSpec,
    /// Quantization scheme of the tensor records
    pub quantization: String,
    pub created_at: DateTime<Utc>,
    /// Crate version that wrote the file
    pub producer: String,
}

/// One quantized tensor
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub params: QuantParams,
    pub data: Vec<u8>,
}

impl QuantizedTensor {
    /// Float values of the tensor
    pub fn dequantize(&self) -> Vec<f32> {
        dequantize(&self.data, self.params)
    }

    /// Number of elements implied by the shape
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A decoded model file
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub metadata: ArtifactMetadata,
    pub tensors: Vec<QuantizedTensor>,
}

fn invalid(msg: impl Into<String>) -> ClassifierError {
    ClassifierError::InvalidArtifact(msg.into())
}

impl ModelArtifact {
    /// Serialize to the container format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let metadata = serde_json::to_vec(&self.metadata)?;

        let mut out = Vec::with_capacity(
            64 + metadata.len() + self.tensors.iter().map(|t| t.data.len() + 64).sum::<usize>(),
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        out.extend_from_slice(&(metadata.len() as u64).to_le_bytes());
        out.extend_from_slice(&metadata);
        out.extend_from_slice(&crc32fast::hash(&metadata).to_le_bytes());

        let count = u32::try_from(self.tensors.len())
            .map_err(|_| ClassifierError::Export("too many tensors".to_string()))?;
        out.extend_from_slice(&count.to_le_bytes());

        for tensor in &self.tensors {
            if tensor.num_elements() != tensor.data.len() {
                return Err(ClassifierError::Export(format!(
                    "tensor '{}' has shape {:?} but {} values",
                    tensor.name,
                    tensor.shape,
                    tensor.data.len()
                )));
            }

            let name = tensor.name.as_bytes();
            let name_len = u16::try_from(name.len()).map_err(|_| {
                ClassifierError::Export(format!("tensor name too long: {}", tensor.name))
            })?;
            out.extend_from_slice(&name_len.to_le_bytes());
            out.extend_from_slice(name);

            let rank = u8::try_from(tensor.shape.len())
                .map_err(|_| ClassifierError::Export(format!("rank too large: {}", tensor.name)))?;
            out.push(rank);
            for &dim in &tensor.shape {
                let dim = u32::try_from(dim).map_err(|_| {
                    ClassifierError::Export(format!("dimension too large: {}", tensor.name))
                })?;
                out.extend_from_slice(&dim.to_le_bytes());
            }

            out.extend_from_slice(&tensor.params.scale.to_le_bytes());
            out.push(tensor.params.zero_point);

            out.extend_from_slice(&(tensor.data.len() as u64).to_le_bytes());
            out.extend_from_slice(&tensor.data);
            out.extend_from_slice(&crc32fast::hash(&tensor.data).to_le_bytes());
        }

        Ok(out)
    }

    /// Parse and validate a container
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);

        if reader.take(4)? != MAGIC {
            return Err(invalid("bad magic, not a quantized classifier file"));
        }
        let version = reader.u16()?;
        if version != FORMAT_VERSION {
            return Err(invalid(format!("unsupported format version {}", version)));
        }
        let _reserved = reader.u16()?;

        let metadata_len = reader.len_u64()?;
        let metadata_bytes = reader.take(metadata_len)?;
        if reader.u32()? != crc32fast::hash(metadata_bytes) {
            return Err(invalid("metadata checksum mismatch"));
        }
        let metadata: ArtifactMetadata = serde_json::from_slice(metadata_bytes)
            .map_err(|e| invalid(format!("unreadable metadata: {}", e)))?;

        let count = reader.u32()? as usize;
        let mut tensors = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let name_len = reader.u16()? as usize;
            let name = std::str::from_utf8(reader.take(name_len)?)
                .map_err(|_| invalid("tensor name is not UTF-8"))?
                .to_string();

            let rank = reader.u8()? as usize;
            let mut shape = Vec::with_capacity(rank);
            for _ in 0..rank {
                shape.push(reader.u32()? as usize);
            }

            let scale = f32::from_le_bytes(reader.array::<4>()?);
            let zero_point = reader.u8()?;

            let data_len = reader.len_u64()?;
            let data = reader.take(data_len)?.to_vec();
            if reader.u32()? != crc32fast::hash(&data) {
                return Err(invalid(format!("checksum mismatch in tensor '{}'", name)));
            }
            if shape.iter().product::<usize>() != data.len() {
                return Err(invalid(format!(
                    "tensor '{}' has shape {:?} but {} values",
                    name,
                    shape,
                    data.len()
                )));
            }

            tensors.push(QuantizedTensor {
                name,
                shape,
                params: QuantParams { scale, zero_point },
                data,
            });
        }

        if !reader.is_empty() {
            return Err(invalid("trailing bytes after last tensor"));
        }

        Ok(Self { metadata, tensors })
    }

    /// Read and decode a model file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
    }
}

/// Bounds-checked little-endian cursor
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| invalid(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn len_u64(&mut self) -> Result<usize> {
        let len = u64::from_le_bytes(self.array()?);
        usize::try_from(len).map_err(|_| invalid("length does not fit in memory"))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
