use crate::document::Document;
use crate::error::BindingError;

/// Resolves URI references found on `import` and definition-reference
/// elements.
///
/// The engine itself only understands same-document fragments (see
/// [`FragmentResolver`]); hosts that load binding documents from elsewhere
/// install their own resolver and merge the fetched content into the
/// document before returning its node id.
pub trait ReferenceResolver {
    /// Resolve a reference to any node.
    fn resolve_referenced_node(
        &self,
        doc: &Document,
        context_id: usize,
        uri: &str,
    ) -> Result<usize, BindingError>;

    /// Resolve a reference that must name an element.
    fn resolve_referenced_element(
        &self,
        doc: &Document,
        context_id: usize,
        uri: &str,
    ) -> Result<usize, BindingError> {
        let node_id = self.resolve_referenced_node(doc, context_id, uri)?;
        if doc.nodes[node_id].is_element() {
            Ok(node_id)
        } else {
            Err(BindingError::BadReferenceTarget {
                uri: uri.to_string(),
            })
        }
    }
}

/// The default resolver: same-document `#fragment` references, looked up by
/// `id` attribute.
pub struct FragmentResolver;

impl ReferenceResolver for FragmentResolver {
    fn resolve_referenced_node(
        &self,
        doc: &Document,
        context_id: usize,
        uri: &str,
    ) -> Result<usize, BindingError> {
        let Some(fragment) = uri.strip_prefix('#') else {
            return Err(BindingError::UnresolvedReference {
                uri: uri.to_string(),
            });
        };
        let node_id =
            doc.node_by_id_attr(fragment)
                .ok_or_else(|| BindingError::UnresolvedReference {
                    uri: uri.to_string(),
                })?;
        // A reference whose target contains the referencing element would
        // import itself forever.
        if node_id == context_id || doc.is_ancestor_of(node_id, context_id) {
            return Err(BindingError::CircularReference {
                uri: uri.to_string(),
            });
        }
        Ok(node_id)
    }
}
