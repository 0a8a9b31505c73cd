//! Context resolution
//!
//! The context of an installation is the set of installations it may import
//! from: its parent, and the siblings that share that parent. Root
//! installations have no parent; their siblings are the other roots of the
//! namespace.

use tracing::debug;

use crate::error::{ImportError, Result};
use crate::graph::InstallationStore;
use crate::installation::Installation;

/// Visibility scope of one installation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    pub parent: Option<Installation>,
    /// Siblings in store listing order, never including the installation itself
    pub siblings: Vec<Installation>,
}

impl Context {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn sibling(&self, name: &str) -> Option<&Installation> {
        self.siblings.iter().find(|sibling| sibling.name() == name)
    }
}

/// Compute the context of `installation` from the current store contents
pub fn resolve_context<S>(store: &S, installation: &Installation) -> Result<Context>
where
    S: InstallationStore + ?Sized,
{
    let reference = installation.object_ref();
    let context_error = |reason: String| ImportError::ContextResolution {
        installation: reference.clone(),
        reason,
    };

    let parent = match installation.parent_ref() {
        None => None,
        Some(parent_ref) => {
            let parent = store
                .get_installation(&parent_ref)
                .map_err(|e| context_error(format!("unable to get parent {}: {}", parent_ref, e)))?
                .ok_or_else(|| context_error(format!("parent {} not found", parent_ref)))?;
            Some(parent)
        }
    };

    let siblings: Vec<Installation> = store
        .list_installations(installation.namespace())
        .map_err(|e| context_error(format!("unable to list installations: {}", e)))?
        .into_iter()
        .filter(|candidate| candidate.name() != installation.name())
        .filter(|candidate| candidate.metadata.parent == installation.metadata.parent)
        .collect();

    debug!(
        installation = %reference,
        parent = ?installation.metadata.parent,
        siblings = siblings.len(),
        "resolved context"
    );

    Ok(Context { parent, siblings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_context_resolution_error;
    use crate::graph::InstallationGraph;
    use crate::installation::ObjectRef;

    fn names(installations: &[Installation]) -> Vec<&str> {
        installations.iter().map(|inst| inst.name()).collect()
    }

    #[test]
    fn test_root_siblings_exclude_children_and_other_namespaces() {
        let graph = InstallationGraph::builder()
            .installation(Installation::new("test", "a"))
            .installation(Installation::new("test", "b"))
            .installation(Installation::new("test", "child").with_parent("a"))
            .installation(Installation::new("other", "c"))
            .build()
            .unwrap();

        let a = graph.get(&ObjectRef::new("test", "a")).unwrap();
        let context = resolve_context(&graph, a).unwrap();
        assert!(context.is_root());
        assert_eq!(names(&context.siblings), vec!["b"]);
        assert!(context.sibling("b").is_some());
        assert!(context.sibling("child").is_none());
    }

    #[test]
    fn test_missing_parent_is_an_error_not_a_root() {
        let graph = InstallationGraph::builder()
            .installation(Installation::new("test", "orphan").with_parent("gone"))
            .installation(Installation::new("test", "root"))
            .build()
            .unwrap();

        let orphan = graph.get(&ObjectRef::new("test", "orphan")).unwrap();
        let err = resolve_context(&graph, orphan).unwrap_err();
        assert!(is_context_resolution_error(&err));
        assert!(err.to_string().contains("parent test/gone not found"));
    }
}
