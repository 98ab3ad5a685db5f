use crate::document::Document;

/// Host hook for materialising renderable output when bindings attach.
///
/// After a shadow tree finishes binding, the engine walks the bound element's
/// flattened children and offers each newly visible element to the builder.
/// Elements with no renderable mapping return `None` and are skipped without
/// error.
pub trait SceneGraphBuilder {
    /// Build (or rebuild) the scene-graph node for `element_id`, returning
    /// the host's handle for it.
    fn build(&mut self, doc: &Document, element_id: usize) -> Option<usize>;
}
