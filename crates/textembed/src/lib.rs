//! Text embedder (spec §4.10, component C10).
//!
//! Loaded once per process and pinned to a device at construction. Batch
//! inference degrades gracefully on CUDA OOM: halve the batch (down to a
//! floor of 8) and retry once, then fall back to CPU for whatever is
//! left in that batch.

use chaffee_common::IngestError;
use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::PathBuf;
use std::sync::Mutex;
use tokenizers::Tokenizer;

const MIN_BATCH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone)]
pub struct TextEmbedConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub device: Device,
    pub dim: usize,
    pub max_length: usize,
}

struct Loaded {
    session: Session,
    tokenizer: Tokenizer,
    device: Device,
}

/// Process-wide singleton wrapping the ONNX session and tokenizer. The
/// device is fixed at construction; OOM fallback only ever affects a
/// single batch, never the pinned device of the singleton itself.
pub struct TextEmbedder {
    config: TextEmbedConfig,
    loaded: Mutex<Option<Loaded>>,
}

impl TextEmbedder {
    #[must_use]
    pub fn new(config: TextEmbedConfig) -> Self {
        Self {
            config,
            loaded: Mutex::new(None),
        }
    }

    fn load(&self, device: Device) -> Result<Loaded, IngestError> {
        let session = match device {
            Device::Gpu => chaffee_modelrt::create_gpu_session(&self.config.model_path),
            Device::Cpu => chaffee_modelrt::create_cpu_session(&self.config.model_path),
        }
        .map_err(|e| IngestError::Config(format!("failed to load text embedding model: {e}")))?;

        let tokenizer = Tokenizer::from_file(&self.config.tokenizer_path)
            .map_err(|e| IngestError::Config(format!("failed to load tokenizer: {e}")))?;

        Ok(Loaded {
            session,
            tokenizer,
            device,
        })
    }

    /// Encodes `texts` into L2-normalized embeddings, one row per input.
    /// Retries through the OOM degradation ladder on failure; the first
    /// call loads the singleton onto the configured device.
    pub fn encode(&self, texts: &[String], source_id: &str) -> Result<Array2<f32>, IngestError> {
        if texts.is_empty() {
            return Ok(Array2::zeros((0, self.config.dim)));
        }

        let mut guard = self.loaded.lock().map_err(|_| IngestError::TextEmbedOom {
            source_id: source_id.to_string(),
        })?;
        if guard.is_none() {
            *guard = Some(self.load(self.config.device)?);
        }

        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut remaining = texts;
        let mut batch_size = texts.len();

        loop {
            let chunk = &remaining[0..batch_size.min(remaining.len())];
            let loaded = guard.as_mut().expect("just initialized");

            match encode_batch(&mut loaded.session, &loaded.tokenizer, chunk, self.config.max_length, self.config.dim, source_id) {
                Ok(batch_rows) => {
                    rows.extend(batch_rows);
                    remaining = &remaining[chunk.len()..];
                    if remaining.is_empty() {
                        break;
                    }
                    batch_size = remaining.len();
                }
                Err(e) if is_oom(&e) && batch_size > MIN_BATCH => {
                    tracing::warn!(source_id, "CUDA OOM during text embedding, halving batch size");
                    batch_size = (batch_size / 2).max(MIN_BATCH);
                }
                Err(e) if is_oom(&e) && loaded.device == Device::Gpu => {
                    tracing::warn!(source_id, "CUDA OOM persists at floor batch size, falling back to CPU");
                    let cpu_loaded = self.load(Device::Cpu)?;
                    *guard = Some(cpu_loaded);
                }
                Err(e) => return Err(e),
            }
        }

        Array2::from_shape_vec((texts.len(), self.config.dim), rows.into_iter().flatten().collect())
            .map_err(|e| IngestError::Config(format!("text embedding matrix shape mismatch: {e}")))
    }
}

fn is_oom(err: &IngestError) -> bool {
    matches!(err, IngestError::TextEmbedOom { .. })
}

fn encode_batch(
    session: &mut Session,
    tokenizer: &Tokenizer,
    texts: &[String],
    max_length: usize,
    dim: usize,
    source_id: &str,
) -> Result<Vec<Vec<f32>>, IngestError> {
    let mut rows = Vec::with_capacity(texts.len());

    for text in texts {
        let encoding = tokenizer
            .encode(text.as_str(), true)
            .map_err(|e| IngestError::Config(format!("tokenization failed: {e}")))?;

        let mut tokens: Vec<i64> = encoding.get_ids().iter().map(|&t| i64::from(t)).collect();
        let mut mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| i64::from(m)).collect();
        tokens.truncate(max_length);
        mask.truncate(max_length);
        let seq_len = tokens.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), tokens)
            .map_err(|e| IngestError::Config(format!("input_ids shape error: {e}")))?;
        let attention_mask = Array2::from_shape_vec((1, seq_len), mask.clone())
            .map_err(|e| IngestError::Config(format!("attention_mask shape error: {e}")))?;
        let token_type_ids = Array2::<i64>::zeros((1, seq_len));

        let input_ids_tensor = TensorRef::from_array_view(input_ids.view())
            .map_err(|e| IngestError::Config(format!("tensor construction failed: {e}")))?;
        let attention_mask_tensor = TensorRef::from_array_view(attention_mask.view())
            .map_err(|e| IngestError::Config(format!("tensor construction failed: {e}")))?;
        let token_type_ids_tensor = TensorRef::from_array_view(token_type_ids.view())
            .map_err(|e| IngestError::Config(format!("tensor construction failed: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_ids_tensor, attention_mask_tensor, token_type_ids_tensor])
            .map_err(|e| {
                if e.to_string().to_lowercase().contains("out of memory") {
                    IngestError::TextEmbedOom {
                        source_id: source_id.to_string(),
                    }
                } else {
                    IngestError::Config(format!("onnx inference failed: {e}"))
                }
            })?;

        let (shape, hidden_states) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| IngestError::Config(format!("tensor extraction failed: {e}")))?;
        let hidden_dim = shape[2] as usize;

        let mut pooled = mean_pool(hidden_states, &mask, hidden_dim);
        l2_normalize(&mut pooled);
        pooled.resize(dim, 0.0);
        rows.push(pooled);
    }

    Ok(rows)
}

fn mean_pool(hidden_states: &[f32], attention_mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut sum_mask = 0.0f32;

    for (i, &mask_val) in attention_mask.iter().enumerate() {
        let mask_val = mask_val as f32;
        sum_mask += mask_val;
        for (j, pooled_val) in pooled.iter_mut().enumerate() {
            *pooled_val += hidden_states[i * hidden_dim + j] * mask_val;
        }
    }

    if sum_mask > 0.0 {
        for val in &mut pooled {
            *val /= sum_mask;
        }
    }
    pooled
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_empty_matrix() {
        let embedder = TextEmbedder::new(TextEmbedConfig {
            model_path: PathBuf::from("models/text/bge-small.onnx"),
            tokenizer_path: PathBuf::from("models/text/tokenizer.json"),
            device: Device::Cpu,
            dim: 384,
            max_length: 256,
        });
        let matrix = embedder.encode(&[], "vid1").unwrap();
        assert_eq!(matrix.shape(), &[0, 384]);
    }

    #[test]
    fn l2_normalize_unit_vector_is_a_no_op() {
        let mut v = vec![1.0f32, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!((v[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_scales_to_unit_norm() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mean_pool_ignores_padding_tokens() {
        let hidden = vec![1.0f32, 1.0, /* token 0 */ 100.0, 100.0 /* padding */];
        let mask = vec![1, 0];
        let pooled = mean_pool(&hidden, &mask, 2);
        assert_eq!(pooled, vec![1.0, 1.0]);
    }
}
