//! Renders a small display list through the engine and writes the
//! composited surface to `canvas_demo.png`.
//!
//! Run with `RUST_LOG=debug` to watch the decode and scheduler logs.

use anyhow::{Context, Result};
use canvas_engine::{BufferMap, CanvasConfig, CanvasEngine, Rect, SampledBuffer};
use tiny_skia::Pixmap;

/// Serializes operations the way the in-process producer does: ASCII
/// tag bytes in memory order, host-native payload words.
struct Encoder {
    words: Vec<u32>,
}

impl Encoder {
    fn new() -> Self {
        Self { words: Vec::new() }
    }

    fn op(&mut self, name: &[u8; 4]) -> &mut Self {
        self.words.push(u32::from_be_bytes(*name).swap_bytes());
        self
    }

    fn f32s(&mut self, values: &[f32]) -> &mut Self {
        self.words.extend(values.iter().map(|v| v.to_bits()));
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.words.push(v);
        self
    }

    fn str(&mut self, s: &str) -> &mut Self {
        let bytes = s.as_bytes();
        self.words.push(bytes.len() as u32);
        for chunk in bytes.chunks(4) {
            let mut padded = [0u8; 4];
            padded[..chunk.len()].copy_from_slice(chunk);
            self.words.push(u32::from_ne_bytes(padded));
        }
        self
    }
}

fn demo_stream() -> Vec<u32> {
    let mut e = Encoder::new();
    // background
    e.op(b"bpth")
        .op(b"rect")
        .f32s(&[0.0, 0.0, 320.0, 240.0])
        .op(b"flst")
        .str("rgb(24,24,32)")
        .op(b"fill");
    // gradient bar
    e.op(b"grad")
        .u32(1)
        .f32s(&[0.0, 0.0, 20.0, 200.0, 280.0, 0.0])
        .op(b"grcs")
        .u32(1)
        .f32s(&[0.0])
        .str("rgb(255,80,0)")
        .op(b"grcs")
        .u32(1)
        .f32s(&[1.0])
        .str("rgb(0,80,255)")
        .op(b"flsg")
        .u32(1)
        .op(b"bpth")
        .op(b"rect")
        .f32s(&[20.0, 20.0, 280.0, 40.0])
        .op(b"fill");
    // stroked arc
    e.op(b"bpth")
        .op(b"arc ")
        .f32s(&[160.0, 150.0, 60.0, 0.0, std::f32::consts::PI * 1.5])
        .u32(0)
        .op(b"stst")
        .str("rgb(240,240,240)")
        .op(b"linw")
        .f32s(&[4.0])
        .op(b"strk");
    // sampled data blit with the default grayscale ramp
    e.op(b"data")
        .u32(16)
        .u32(16)
        .u32(100)
        .f32s(&[240.0, 100.0, 64.0, 64.0, 0.0, 1.0])
        .u32(0);
    e.words
}

fn demo_buffers() -> BufferMap {
    let mut buffers = BufferMap::new();
    let data = (0..256).map(|i| i as f32 / 255.0).collect();
    buffers.insert(
        100,
        SampledBuffer::Scalar {
            width: 16,
            height: 16,
            data,
        },
    );
    buffers
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let (engine, mut repaints) = CanvasEngine::new(CanvasConfig::default());
    engine.replace_section(
        1,
        Rect::new(0, 0, 320, 240),
        1.0,
        demo_stream(),
        demo_buffers(),
    );

    let request = repaints
        .recv()
        .await
        .context("engine dropped the repaint channel")?;
    log::info!("section {} published {:?}", request.section_id, request.rect);

    let mut surface = Pixmap::new(320, 240).context("surface allocation failed")?;
    engine.composite(&mut surface);
    surface
        .save_png("canvas_demo.png")
        .context("failed to write canvas_demo.png")?;
    println!("wrote canvas_demo.png");
    Ok(())
}
