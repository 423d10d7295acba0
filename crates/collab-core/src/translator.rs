//! Outbound translator: local editor events to protocol messages.
//!
//! The protocol only knows inserts and deletes. A content change that removes
//! text *and* inserts text (a replace) has no wire representation and is
//! dropped with a warning rather than guessed into two operations.

use crate::host::{ContentChange, LocalEvent};
use crate::protocol::{Change, DocumentId, Outbound, Selection};
use crate::registry::Registry;
use std::hash::Hash;
use tracing::{debug, warn};

/// Translate one local event into the messages to send.
///
/// Returns nothing for documents that are not shared, and no `change`
/// messages while `suppressed` is set (the text change was caused by the
/// core applying a remote edit, not by the user).
pub fn translate<D: Eq + Hash, E>(
    event: &LocalEvent<D>,
    registry: &Registry<D, E>,
    suppressed: bool,
) -> Vec<Outbound> {
    match event {
        LocalEvent::SelectionChanged {
            document,
            selection,
        } => match registry.resolve_id(document) {
            Some(id) => vec![selection_message(id, *selection)],
            None => Vec::new(),
        },
        LocalEvent::TextChanged { document, changes } => {
            if suppressed {
                debug!("Suppressing {} change(s) from a remote edit", changes.len());
                return Vec::new();
            }
            let Some(id) = registry.resolve_id(document) else {
                return Vec::new();
            };
            changes
                .iter()
                .filter_map(classify)
                .map(|change| Outbound::Change {
                    document_id: id.clone(),
                    change,
                })
                .collect()
        }
    }
}

/// `set_cursor` for a collapsed selection, `set_selection` otherwise.
pub fn selection_message(id: &DocumentId, selection: Selection) -> Outbound {
    if selection.is_collapsed() {
        Outbound::SetCursor {
            document_id: id.clone(),
            location: selection.point,
        }
    } else {
        Outbound::SetSelection {
            document_id: id.clone(),
            point: selection.point,
            mark: selection.mark,
        }
    }
}

/// Map a content change onto the insert/delete vocabulary.
pub fn classify(change: &ContentChange) -> Option<Change> {
    if change.removed == 0 {
        Some(Change::Insert {
            index: change.offset,
            text: change.text.clone(),
        })
    } else if change.text.is_empty() {
        Some(Change::Delete {
            index: change.offset,
            len: change.removed,
        })
    } else {
        warn!("Unknown change: {:?}", change);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_registry() -> Registry<u32, u32> {
        let mut registry = Registry::new();
        registry.bind(1, 1, "doc-1".into());
        registry
    }

    #[test]
    fn test_collapsed_selection_sends_cursor() {
        let event = LocalEvent::SelectionChanged {
            document: 1,
            selection: Selection::collapsed(4),
        };
        assert_eq!(
            translate(&event, &shared_registry(), false),
            vec![Outbound::SetCursor {
                document_id: "doc-1".into(),
                location: 4,
            }]
        );
    }

    #[test]
    fn test_ranged_selection_sends_selection() {
        let event = LocalEvent::SelectionChanged {
            document: 1,
            selection: Selection::new(9, 2),
        };
        assert_eq!(
            translate(&event, &shared_registry(), false),
            vec![Outbound::SetSelection {
                document_id: "doc-1".into(),
                point: 9,
                mark: 2,
            }]
        );
    }

    #[test]
    fn test_unshared_document_sends_nothing() {
        let registry = shared_registry();
        let selection = LocalEvent::SelectionChanged {
            document: 2,
            selection: Selection::collapsed(0),
        };
        let text = LocalEvent::TextChanged {
            document: 2,
            changes: vec![ContentChange::insert(0, "x")],
        };
        assert!(translate(&selection, &registry, false).is_empty());
        assert!(translate(&text, &registry, false).is_empty());
    }

    #[test]
    fn test_batched_changes_keep_order() {
        let event = LocalEvent::TextChanged {
            document: 1,
            changes: vec![
                ContentChange::insert(10, "b"),
                ContentChange::delete(2, 3),
            ],
        };
        assert_eq!(
            translate(&event, &shared_registry(), false),
            vec![
                Outbound::Change {
                    document_id: "doc-1".into(),
                    change: Change::Insert {
                        index: 10,
                        text: "b".into()
                    },
                },
                Outbound::Change {
                    document_id: "doc-1".into(),
                    change: Change::Delete { index: 2, len: 3 },
                },
            ]
        );
    }

    #[test]
    fn test_replace_is_dropped() {
        let event = LocalEvent::TextChanged {
            document: 1,
            changes: vec![
                ContentChange {
                    offset: 0,
                    removed: 2,
                    text: "xy".into(),
                },
                ContentChange::insert(5, "z"),
            ],
        };
        let messages = translate(&event, &shared_registry(), false);
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            Outbound::Change {
                change: Change::Insert { index: 5, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_suppressed_text_changes_send_nothing() {
        let event = LocalEvent::TextChanged {
            document: 1,
            changes: vec![ContentChange::insert(0, "x")],
        };
        assert!(translate(&event, &shared_registry(), true).is_empty());
    }

    #[test]
    fn test_suppression_does_not_affect_selection() {
        let event = LocalEvent::SelectionChanged {
            document: 1,
            selection: Selection::collapsed(1),
        };
        assert_eq!(translate(&event, &shared_registry(), true).len(), 1);
    }
}
