//! Relation graph cycle detection.

use super::scope::{Scope, ScopeRelation};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

/// Finds relations that close a cycle in the relation graph.
///
/// Runs one depth-first sweep per entity as root, in declaration order. A
/// relation pointing back into the active path is reported and the walk does
/// not follow it. Each relation appears at most once in the result.
pub fn find_cycles(scope: &Scope) -> Vec<&ScopeRelation> {
    let mut reported: HashSet<String> = HashSet::new();
    let mut offending = Vec::new();

    for root in scope.entities() {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        visit(scope, &root.name, &mut marks, &mut reported, &mut offending);
    }

    offending
}

fn visit<'s>(
    scope: &'s Scope,
    entity: &'s str,
    marks: &mut HashMap<&'s str, Mark>,
    reported: &mut HashSet<String>,
    offending: &mut Vec<&'s ScopeRelation>,
) {
    marks.insert(entity, Mark::Active);

    for relation in scope.relations_from(entity) {
        match marks.get(relation.target.as_str()) {
            Some(Mark::Active) => {
                if reported.insert(relation.key()) {
                    offending.push(relation);
                }
            }
            Some(Mark::Done) => {}
            None => {
                if scope.entity(&relation.target).is_some() {
                    visit(scope, &relation.target, marks, reported, offending);
                }
            }
        }
    }

    marks.insert(entity, Mark::Done);
}
