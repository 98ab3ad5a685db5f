/// Error type listeners may return from a notification callback.
///
/// Dispatch sites forward these to the document's [`ErrorSink`] and carry on
/// with the remaining listeners; a failing listener can never abort the
/// binding transition that notified it.
///
/// [`ErrorSink`]: crate::ErrorSink
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Phases of a shadow tree's lifecycle, fired on the bound element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowTreePhase {
    /// The shadow tree is about to be attached to the bound element.
    Prebind,
    /// The shadow tree is attached and its descendants have been bound.
    Bound,
    /// The shadow tree is about to be detached from the bound element.
    Unbinding,
}

/// A shadow-tree lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowTreeEvent {
    pub phase: ShadowTreePhase,
    /// The bindable element whose shadow tree is transitioning.
    pub bound_element: usize,
    /// The shadow tree root involved in the transition.
    pub shadow_tree: usize,
}

/// Notified when the binding of a bindable element changes.
pub trait BindingListener {
    /// `shadow_tree` is the new shadow tree root, or `None` if the element
    /// no longer has one.
    fn binding_changed(
        &mut self,
        bound_element: usize,
        shadow_tree: Option<usize>,
    ) -> Result<(), ListenerError>;
}

/// A [`BindingListener`] which does nothing.
pub struct NoopBindingListener;
impl BindingListener for NoopBindingListener {
    fn binding_changed(&mut self, _: usize, _: Option<usize>) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Notified at each phase of a shadow tree's lifecycle.
pub trait ShadowTreeListener {
    fn shadow_tree_event(&mut self, event: ShadowTreeEvent) -> Result<(), ListenerError>;
}

/// Notified when a content element's selected-node list changes.
///
/// Registered either per content element (on the owning content manager) or
/// globally (on the binding manager); per-element listeners fire first.
pub trait ContentSelectionChangedListener {
    fn content_selection_changed(&mut self, content_element: usize) -> Result<(), ListenerError>;
}
