//! dxshadow - headless driver
//!
//! Renders a few frames against the in-memory null device and prints the
//! per-frame state-change statistics.

use std::sync::Arc;

use anyhow::{Context, Result};
use dxs_core::{init_logging, Config};
use dxs_render::backend::null::NullDevice;
use dxs_render::backend::{DeviceStatus, Light, TransformKind};
use dxs_render::fvf::FVF_XYZNDUV2;
use dxs_render::math::{self, Vector3f};
use dxs_render::vertex::VertexXyzDUV1;
use dxs_render::{
    FrameOutcome, InstanceCandidate, InstanceManager, Overlay2d, PolygonRenderer, RenderContext,
};

const FRAMES: u32 = 4;
const MESHES: u32 = 32;

fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration, using defaults: {}", e);
            Config::default()
        }
    };
    init_logging(config.debug.log_level);
    tracing::info!("Starting dxshadow headless driver");

    let mut ctx = RenderContext::new(NullDevice::new(), config).context("creating render context")?;

    let instancing = InstanceManager::shared(&ctx.config().instancing);
    if let Err(e) = instancing.lock().init(&mut ctx) {
        tracing::warn!("Instancing disabled: {}", e);
    }
    ctx.register_resource_hook(Box::new(Arc::clone(&instancing)));

    let mesh_vb = ctx.create_vertex_buffer(FVF_XYZNDUV2, 24).context("creating mesh vertices")?;
    let mesh_ib = ctx.create_index_buffer(36).context("creating mesh indices")?;
    let texture = ctx.create_texture(64, 64, 1).context("creating texture")?;
    let mesh = PolygonRenderer {
        index_offset: 0,
        vertex_offset: 0,
        index_count: 36,
        min_vertex_index: 0,
        vertex_index_range: 24,
        strip: false,
        pass: 0,
    };
    let candidates: Vec<InstanceCandidate> = (0..MESHES)
        .map(|i| InstanceCandidate::rigid(math::translation(i as f32 * 2.0, 0.0, 10.0), mesh))
        .collect();

    let overlay = Overlay2d::new();
    let corner = |x: f32, y: f32, u: f32, v: f32| VertexXyzDUV1 {
        position: [x, y, 0.0],
        diffuse: 0xFFFF_FFFF,
        uv: [u, v],
    };
    let quad = [
        corner(-1.0, 1.0, 0.0, 0.0),
        corner(-0.5, 1.0, 1.0, 0.0),
        corner(-0.5, 0.5, 1.0, 1.0),
        corner(-1.0, 0.5, 0.0, 1.0),
    ];

    ctx.set_light(0, Some(Light::directional(Vector3f::new(0.0, -1.0, 0.0), [1.0, 1.0, 1.0])));
    ctx.set_transform(TransformKind::View, &math::translation(0.0, -2.0, 0.0));

    for frame in 0..FRAMES {
        if frame == FRAMES - 2 {
            ctx.device_mut().set_lose_on_present(true);
        }
        if ctx.is_device_lost() {
            // The null device accepts a reset one frame after the loss
            ctx.device_mut().set_status(DeviceStatus::NotReset);
            if !ctx.reset_device(true) {
                continue;
            }
            tracing::info!("Device recovered before frame {}", frame);
        }

        ctx.begin_scene().context("begin scene")?;
        ctx.set_vertex_buffer(0, Some(&mesh_vb));
        ctx.set_index_buffer(Some(&mesh_ib), 0);
        ctx.set_fvf(FVF_XYZNDUV2, "Mesh");
        ctx.set_texture(0, Some(&texture));

        let mut manager = instancing.lock();
        manager.begin_frame_statistics();
        manager.collect(&candidates, &mesh);
        let drawn = match manager.draw_instanced(&mut ctx, &mesh, FVF_XYZNDUV2) {
            Ok(drawn) => drawn,
            Err(e) => {
                tracing::debug!("Instanced draw fell back to per-mesh draws: {}", e);
                false
            }
        };
        if !drawn {
            for candidate in &candidates {
                ctx.set_transform(TransformKind::World, &candidate.world);
                mesh.render(&mut ctx, 0);
            }
        }
        manager.end_frame_statistics();
        drop(manager);

        overlay
            .render(&mut ctx, &quad, &[0, 1, 2, 0, 2, 3], Some(&texture))
            .context("drawing overlay")?;

        let outcome = ctx.end_scene(true);
        let counters = ctx.stats().last_frame();
        println!(
            "frame {}: {:?}, {} draws, {} polygons, {} device calls ({} matrix, {} texture, {} vb, {} ib)",
            frame,
            outcome,
            counters.draw_calls,
            counters.polygons,
            counters.device_calls,
            counters.matrix_changes,
            counters.texture_changes,
            counters.vertex_buffer_changes,
            counters.index_buffer_changes,
        );
        if outcome == FrameOutcome::Lost {
            tracing::warn!("Device lost at frame {}", frame);
        }
    }

    let manager = instancing.lock();
    println!(
        "instancing: {} draws, {} instances last frame",
        manager.last_frame_draw_calls(),
        manager.last_frame_instances()
    );
    Ok(())
}
