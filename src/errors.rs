#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The command stream ended in the middle of an operation's payload.
    /// Fatal to the decode pass; partial output is discarded.
    #[error("command stream truncated at word {offset}")]
    StructuralTruncation { offset: usize },

    /// A `restore` arrived with no matching `save` on the stack.
    #[error("restore without matching save")]
    StateUnderflow,

    /// The render surface for a section or layer could not be allocated.
    #[error("surface allocation failed ({width}x{height})")]
    SurfaceAllocation { width: u32, height: u32 },

    /// An `end_layer` arrived that does not pair with an open layer.
    #[error("end layer {layer_id} without matching begin layer")]
    LayerUnderflow { layer_id: u32 },
}
