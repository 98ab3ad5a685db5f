//! Dynamic element binding: definitions, shadow trees, content selection and
//! the flattened tree view.

mod content;
mod flatten;
mod manager;
mod pattern;
mod record;
mod selector;

#[cfg(test)]
mod tests;

pub use content::ContentManager;
pub use manager::BindingManager;
pub use selector::SelectorRegistry;

/// Handle returned by listener registration, used to unregister. Handles are
/// only meaningful against the collection that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn mint(counter: &mut u64) -> Self {
        let id = ListenerId(*counter);
        *counter += 1;
        id
    }
}
