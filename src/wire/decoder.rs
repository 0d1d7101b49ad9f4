//! Lazy decoder for the binary display-list format.
//!
//! [`CommandDecoder`] walks a word buffer and produces [`Command`]s in
//! stream order. It is a pure, restartable producer: decoding the same
//! buffer twice yields structurally equal sequences. Unknown tags are
//! skipped after consuming only their tag word; running out of words
//! mid-payload aborts the pass with
//! [`RenderError::StructuralTruncation`].

use crate::errors::RenderError;
use crate::wire::command::{tag, Command};
use crate::wire::reader::WordReader;

pub struct CommandDecoder<'a> {
    reader: WordReader<'a>,
}

impl<'a> CommandDecoder<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self {
            reader: WordReader::new(words),
        }
    }

    /// Decodes the next operation, skipping unknown tags. Returns
    /// `Ok(None)` at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<Command>, RenderError> {
        while !self.reader.is_at_end() {
            let tag_word = self.reader.read_tag()?;
            match self.decode_payload(tag_word)? {
                Some(cmd) => return Ok(Some(cmd)),
                None => {
                    log::trace!("skipping unknown command tag {tag_word:#010x}");
                }
            }
        }
        Ok(None)
    }

    fn decode_payload(&mut self, tag_word: u32) -> Result<Option<Command>, RenderError> {
        let r = &mut self.reader;
        let cmd = match tag_word {
            tag::SAVE => Command::Save,
            tag::RESTORE => Command::Restore,
            tag::BEGIN_PATH => Command::BeginPath,
            tag::CLOSE_PATH => Command::ClosePath,
            tag::CLIP => Command::Clip {
                x: r.read_f32()?,
                y: r.read_f32()?,
                width: r.read_f32()?,
                height: r.read_f32()?,
            },
            tag::TRANSLATE => Command::Translate {
                x: r.read_f32()?,
                y: r.read_f32()?,
            },
            tag::SCALE => Command::Scale {
                x: r.read_f32()?,
                y: r.read_f32()?,
            },
            tag::ROTATE => Command::Rotate {
                degrees: r.read_f32()?,
            },
            tag::MOVE_TO => Command::MoveTo {
                x: r.read_f32()?,
                y: r.read_f32()?,
            },
            tag::LINE_TO => Command::LineTo {
                x: r.read_f32()?,
                y: r.read_f32()?,
            },
            tag::RECT => Command::RectPath {
                x: r.read_f32()?,
                y: r.read_f32()?,
                width: r.read_f32()?,
                height: r.read_f32()?,
            },
            tag::ARC => Command::Arc {
                x: r.read_f32()?,
                y: r.read_f32()?,
                radius: r.read_f32()?,
                start_angle: r.read_f32()?,
                end_angle: r.read_f32()?,
                anticlockwise: r.read_bool()?,
            },
            tag::ARC_TO => Command::ArcTo {
                x1: r.read_f32()?,
                y1: r.read_f32()?,
                x2: r.read_f32()?,
                y2: r.read_f32()?,
                radius: r.read_f32()?,
            },
            tag::CUBIC_TO => Command::CubicTo {
                c1x: r.read_f32()?,
                c1y: r.read_f32()?,
                c2x: r.read_f32()?,
                c2y: r.read_f32()?,
                x: r.read_f32()?,
                y: r.read_f32()?,
            },
            tag::QUAD_TO => Command::QuadTo {
                cx: r.read_f32()?,
                cy: r.read_f32()?,
                x: r.read_f32()?,
                y: r.read_f32()?,
            },
            tag::STROKE => Command::Stroke,
            tag::FILL => Command::Fill,
            tag::FILL_STYLE => Command::FillStyle {
                color: r.read_string()?,
            },
            tag::FILL_STYLE_GRADIENT => Command::FillStyleGradient {
                gradient_id: r.read_i32()?,
            },
            tag::FILL_TEXT => Command::FillText {
                text: r.read_string()?,
                x: r.read_f32()?,
                y: r.read_f32()?,
                max_width: r.read_f32()?,
            },
            tag::STROKE_TEXT => Command::StrokeText {
                text: r.read_string()?,
                x: r.read_f32()?,
                y: r.read_f32()?,
                max_width: r.read_f32()?,
            },
            tag::FONT => Command::Font {
                spec: r.read_string()?,
            },
            tag::TEXT_ALIGN => Command::TextAlign {
                mode: r.read_string()?,
            },
            tag::TEXT_BASELINE => Command::TextBaseline {
                mode: r.read_string()?,
            },
            tag::STROKE_STYLE => Command::StrokeStyle {
                color: r.read_string()?,
            },
            tag::LINE_DASH => Command::LineDash {
                dash: r.read_f32()?,
            },
            tag::LINE_WIDTH => Command::LineWidth {
                width: r.read_f32()?,
            },
            tag::LINE_CAP => Command::LineCap {
                style: r.read_string()?,
            },
            tag::LINE_JOIN => Command::LineJoin {
                style: r.read_string()?,
            },
            tag::GRADIENT => {
                let gradient_id = r.read_i32()?;
                // two leading size floats are carried on the wire but
                // never used by the rasterizer
                let _ = r.read_f32()?;
                let _ = r.read_f32()?;
                Command::Gradient {
                    gradient_id,
                    x: r.read_f32()?,
                    y: r.read_f32()?,
                    dx: r.read_f32()?,
                    dy: r.read_f32()?,
                }
            }
            tag::COLOR_STOP => Command::ColorStop {
                gradient_id: r.read_i32()?,
                position: r.read_f32()?,
                color: r.read_string()?,
            },
            tag::DRAW_IMAGE => Command::DrawImage {
                source_width: r.read_u32()?,
                source_height: r.read_u32()?,
                image_id: r.read_u32()?,
                x: r.read_f32()?,
                y: r.read_f32()?,
                width: r.read_f32()?,
                height: r.read_f32()?,
            },
            tag::DRAW_DATA => Command::DrawData {
                source_width: r.read_u32()?,
                source_height: r.read_u32()?,
                image_id: r.read_u32()?,
                x: r.read_f32()?,
                y: r.read_f32()?,
                width: r.read_f32()?,
                height: r.read_f32()?,
                low: r.read_f32()?,
                high: r.read_f32()?,
                colormap_id: r.read_u32()?,
            },
            tag::STATISTICS => Command::Statistics {
                label: r.read_string()?,
            },
            tag::SLEEP => Command::Sleep {
                seconds: r.read_f32()?,
            },
            tag::LATENCY => Command::Latency {
                seconds: r.read_f64()?,
            },
            tag::MESSAGE => Command::Message {
                text: r.read_string()?,
            },
            tag::TIMESTAMP => Command::Timestamp {
                text: r.read_string()?,
            },
            tag::BEGIN_LAYER => Command::BeginLayer {
                layer_id: r.read_u32()?,
                seed: r.read_u32()?,
                top: r.read_f32()?,
                left: r.read_f32()?,
                height: r.read_f32()?,
                width: r.read_f32()?,
            },
            tag::END_LAYER => Command::EndLayer {
                layer_id: r.read_u32()?,
                seed: r.read_u32()?,
                top: r.read_f32()?,
                left: r.read_f32()?,
                height: r.read_f32()?,
                width: r.read_f32()?,
            },
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }
}

impl Iterator for CommandDecoder<'_> {
    type Item = Result<Command, RenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next().transpose()
    }
}

/// Decodes an entire buffer eagerly. On error the partial output is
/// discarded.
pub fn decode_all(words: &[u32]) -> Result<Vec<Command>, RenderError> {
    CommandDecoder::new(words).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::stream::StreamBuilder;

    #[test]
    fn decodes_path_ops_in_stream_order() {
        let words = StreamBuilder::new()
            .op("bpth")
            .op_f32("move", &[0.0, 0.0])
            .op_f32("line", &[10.0, 0.0])
            .op_f32("line", &[10.0, 10.0])
            .op("cpth")
            .finish();

        let cmds = decode_all(&words).unwrap();
        assert_eq!(
            cmds,
            vec![
                Command::BeginPath,
                Command::MoveTo { x: 0.0, y: 0.0 },
                Command::LineTo { x: 10.0, y: 0.0 },
                Command::LineTo { x: 10.0, y: 10.0 },
                Command::ClosePath,
            ]
        );
    }

    #[test]
    fn decoding_is_idempotent() {
        let words = StreamBuilder::new()
            .op_str("flst", "rgb(255,0,0)")
            .op_f32("rect", &[1.0, 2.0, 3.0, 4.0])
            .op("fill")
            .finish();

        let first = decode_all(&words).unwrap();
        let second = decode_all(&words).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_tag_consumes_only_its_header() {
        let mut words = StreamBuilder::new().op("save").finish();
        words.push(u32::from_be_bytes(*b"zzzz").swap_bytes());
        words.extend(StreamBuilder::new().op("rest").finish());

        let cmds = decode_all(&words).unwrap();
        assert_eq!(cmds, vec![Command::Save, Command::Restore]);
    }

    #[test]
    fn truncated_payload_is_fatal() {
        let mut words = StreamBuilder::new().op_f32("rect", &[1.0, 2.0, 3.0, 4.0]).finish();
        words.truncate(words.len() - 1);
        assert!(matches!(
            decode_all(&words),
            Err(RenderError::StructuralTruncation { .. })
        ));
    }

    #[test]
    fn gradient_discards_leading_size_floats() {
        let words = StreamBuilder::new()
            .op("grad")
            .u32(7)
            .f32(99.0)
            .f32(99.0)
            .f32(1.0)
            .f32(2.0)
            .f32(3.0)
            .f32(4.0)
            .finish();

        let cmds = decode_all(&words).unwrap();
        assert_eq!(
            cmds,
            vec![Command::Gradient {
                gradient_id: 7,
                x: 1.0,
                y: 2.0,
                dx: 3.0,
                dy: 4.0
            }]
        );
    }

    #[test]
    fn arc_bool_is_anticlockwise_flag() {
        let words = StreamBuilder::new()
            .op("arc ")
            .f32(5.0)
            .f32(5.0)
            .f32(2.0)
            .f32(0.0)
            .f32(std::f32::consts::PI)
            .u32(1)
            .finish();

        let cmds = decode_all(&words).unwrap();
        match &cmds[0] {
            Command::Arc { anticlockwise, .. } => assert!(anticlockwise),
            other => panic!("unexpected {other:?}"),
        }
    }
}
