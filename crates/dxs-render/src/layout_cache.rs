//! Compiled vertex-layout cache
//!
//! Maps a legacy format code to a device declaration object compiled from
//! the matching [`VertexLayoutDescriptor`]. Each distinct code is compiled
//! at most once; entries are never replaced and are released together when
//! the cache is torn down.

use std::collections::HashMap;

use crate::backend::{DeclarationHandle, GraphicsDevice, StreamBinding, VertexBufferHandle};
use crate::context::RenderContext;
use crate::fvf;
use crate::resource::EngineVertexBuffer;
use crate::state::VertexSource;
use dxs_core::{LayoutError, ShadowError};

/// One compiled layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutCacheEntry {
    pub fvf: u32,
    pub declaration: DeclarationHandle,
    /// Bytes per vertex on stream 0; authoritative for stream binding
    pub stride: u32,
}

/// Lookup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compile_failures: u64,
}

/// Format code to compiled declaration cache
#[derive(Debug, Default)]
pub struct LayoutCache {
    entries: HashMap<u32, LayoutCacheEntry>,
    stats: LayoutCacheStats,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `fvf`, compiling it on first use
    pub fn get_or_create<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        fvf: u32,
    ) -> Result<LayoutCacheEntry, LayoutError> {
        if let Some(entry) = self.entries.get(&fvf) {
            self.stats.hits += 1;
            return Ok(*entry);
        }
        self.stats.misses += 1;

        let (layout, stride) = match fvf::known_declaration(fvf) {
            Some(known) => known,
            None if fvf::is_supported(fvf) => (fvf::build_declaration(fvf), fvf::fvf_size(fvf)),
            None => {
                tracing::debug!("LayoutCache: no declaration mapping for FVF 0x{:08x}", fvf);
                return Err(LayoutError::UnrecognizedFormat(fvf));
            }
        };

        let declaration = device.create_vertex_declaration(&layout).map_err(|e| {
            self.stats.compile_failures += 1;
            tracing::warn!(
                "LayoutCache: CreateVertexDeclaration failed for FVF 0x{:08x}: {}",
                fvf,
                e
            );
            LayoutError::CompileFailed {
                key: fvf,
                reason: e.to_string(),
            }
        })?;

        let entry = LayoutCacheEntry {
            fvf,
            declaration,
            stride,
        };
        self.entries.insert(fvf, entry);
        tracing::debug!(
            "LayoutCache: compiled FVF 0x{:08x} -> {:?} (stride {}, {} elements)",
            fvf,
            declaration,
            stride,
            layout.len()
        );
        Ok(entry)
    }

    /// Cached entry for `fvf` without compiling
    pub fn get(&self, fvf: u32) -> Option<&LayoutCacheEntry> {
        self.entries.get(&fvf)
    }

    /// Whether `decl` was compiled by this cache
    pub fn owns(&self, decl: DeclarationHandle) -> bool {
        self.entries.values().any(|e| e.declaration == decl)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> LayoutCacheStats {
        self.stats
    }

    /// Release every compiled declaration
    pub fn release_all<D: GraphicsDevice>(&mut self, device: &mut D) {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            device.release_vertex_declaration(entry.declaration);
        }
        if count > 0 {
            tracing::debug!("LayoutCache: released {} declarations", count);
        }
    }
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Select the compiled declaration for `fvf` as the structured layout.
    ///
    /// On failure the record is left untouched; the caller decides how to
    /// degrade.
    pub fn bind_decl(&mut self, fvf: u32, owner: &'static str) -> Result<DeclarationHandle, LayoutError> {
        self.assert_owner_thread();
        let entry = self.layouts.get_or_create(&mut self.device, fvf).inspect_err(|e| {
            tracing::debug!("LayoutCache: bind_decl({}) failed: {}", owner, e);
        })?;
        self.record.set_declaration(entry.declaration, owner);
        Ok(entry.declaration)
    }

    /// Select `fvf` as the legacy layout
    pub fn bind_fvf(&mut self, fvf: u32, owner: &'static str) {
        self.set_fvf(fvf, owner);
    }

    /// Bind `buffer` to stream 0 with the cached stride for its format.
    ///
    /// The binding is written immediately and recorded as applied.
    pub fn bind_stream0(&mut self, buffer: &std::sync::Arc<EngineVertexBuffer>) -> Result<(), ShadowError> {
        self.assert_owner_thread();
        let entry = self.layouts.get_or_create(&mut self.device, buffer.fvf())?;
        self.write_stream0(buffer.handle(), entry.stride)?;
        self.record.streams[0] = VertexSource::Engine(std::sync::Arc::clone(buffer));
        Ok(())
    }

    fn write_stream0(&mut self, buffer: VertexBufferHandle, stride: u32) -> Result<(), ShadowError> {
        self.writer().stream(0, StreamBinding::new(buffer, 0, stride))?;
        Ok(())
    }

    /// The context's layout cache
    pub fn layout_cache(&self) -> &LayoutCache {
        &self.layouts
    }
}
