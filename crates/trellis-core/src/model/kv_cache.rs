//! Per-session KV cache.
//!
//! Stores key/value tensors for each layer across decode steps. A cache
//! belongs to exactly one generation; it may be handed in pre-populated to
//! continue an earlier conversation and taken back out afterwards.

use crate::error::Result;
use candle_core::{Device, Tensor};

/// KV cache for a single layer.
#[derive(Debug, Clone, Default)]
pub struct LayerCache {
    /// Cached keys: [batch, num_kv_heads, seq_len, head_dim]
    key: Option<Tensor>,
    /// Cached values: [batch, num_kv_heads, seq_len, head_dim]
    value: Option<Tensor>,
}

impl LayerCache {
    /// Create a new empty layer cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }

    /// Current sequence length.
    pub fn seq_len(&self) -> usize {
        self.key.as_ref().map(|k| k.dims()[2]).unwrap_or(0)
    }

    /// Append new KV along the sequence dimension and return the full KV.
    pub fn append(&mut self, key: &Tensor, value: &Tensor) -> Result<(Tensor, Tensor)> {
        let (key, value) = match (&self.key, &self.value) {
            (Some(cached_k), Some(cached_v)) => (
                Tensor::cat(&[cached_k, key], 2)?,
                Tensor::cat(&[cached_v, value], 2)?,
            ),
            _ => (key.clone(), value.clone()),
        };
        self.key = Some(key.clone());
        self.value = Some(value.clone());
        Ok((key, value))
    }

    /// Get cached KV without modification.
    pub fn get(&self) -> Option<(&Tensor, &Tensor)> {
        match (&self.key, &self.value) {
            (Some(k), Some(v)) => Some((k, v)),
            _ => None,
        }
    }
}

/// KV cache for all layers of one session.
#[derive(Debug)]
pub struct KvCache {
    layers: Vec<LayerCache>,
    device: Device,
}

impl KvCache {
    /// Create an empty cache with `num_layers` layers.
    pub fn new(num_layers: usize, device: Device) -> Self {
        let layers = (0..num_layers).map(|_| LayerCache::new()).collect();
        Self { layers, device }
    }

    /// Get mutable reference to layer cache.
    pub fn layer_mut(&mut self, layer_idx: usize) -> &mut LayerCache {
        &mut self.layers[layer_idx]
    }

    /// Get reference to layer cache.
    pub fn layer(&self, layer_idx: usize) -> &LayerCache {
        &self.layers[layer_idx]
    }

    /// Number of positions already processed (from the first layer).
    pub fn seq_len(&self) -> usize {
        self.layers.first().map(LayerCache::seq_len).unwrap_or(0)
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.first().map(LayerCache::is_empty).unwrap_or(true)
    }

    /// Get number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Device the cached tensors live on.
    pub fn device(&self) -> &Device {
        &self.device
    }
}
