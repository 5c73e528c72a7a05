//! Arena-indexed change graph.
//!
//! Merge work happens over integer node indices; external `rid`s are
//! mapped in at construction and back out at the boundary. Edges follow
//! schema references (link endpoints, property owners, interface
//! implementations). Cycle detection is DFS with color marking.

use std::collections::HashMap;

use uuid::Uuid;

use oms_schemas::SchemaEntity;

/// Index into the arena. Never exposed outside the merge engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIx(pub u32);

#[derive(Debug)]
pub struct Node {
    pub rid: Uuid,
    pub entity: SchemaEntity,
    /// Outgoing reference edges.
    pub refs: Vec<NodeIx>,
}

#[derive(Debug, Default)]
pub struct ChangeGraph {
    nodes: Vec<Node>,
    by_rid: HashMap<Uuid, NodeIx>,
}

impl ChangeGraph {
    /// Build the graph from a merged snapshot. References to rids outside
    /// the snapshot are dropped here; referential integrity is validated
    /// separately so a dangling edge is reported once, not twice.
    pub fn build(entities: &[SchemaEntity]) -> Self {
        let mut graph = ChangeGraph {
            nodes: Vec::with_capacity(entities.len()),
            by_rid: HashMap::with_capacity(entities.len()),
        };

        for e in entities {
            let ix = NodeIx(graph.nodes.len() as u32);
            graph.by_rid.insert(e.rid(), ix);
            graph.nodes.push(Node {
                rid: e.rid(),
                entity: e.clone(),
                refs: Vec::new(),
            });
        }

        for i in 0..graph.nodes.len() {
            let refs: Vec<NodeIx> = graph.nodes[i]
                .entity
                .references()
                .iter()
                .filter_map(|rid| graph.by_rid.get(rid).copied())
                .collect();
            graph.nodes[i].refs = refs;
        }

        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, ix: NodeIx) -> &Node {
        &self.nodes[ix.0 as usize]
    }

    pub fn lookup(&self, rid: Uuid) -> Option<NodeIx> {
        self.by_rid.get(&rid).copied()
    }

    /// First reference cycle found, as the rid path that closes it.
    /// DFS color marking: white = unvisited, gray = on stack, black = done.
    pub fn find_cycle(&self) -> Option<Vec<Uuid>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let n = self.nodes.len();
        let mut color = vec![Color::White; n];
        let mut parent: Vec<Option<usize>> = vec![None; n];

        for start in 0..n {
            if color[start] != Color::White {
                continue;
            }
            // Iterative DFS: (node, next edge offset).
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            color[start] = Color::Gray;

            while let Some(&(u, edge)) = stack.last() {
                if edge >= self.nodes[u].refs.len() {
                    color[u] = Color::Black;
                    stack.pop();
                    continue;
                }
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }

                let v = self.nodes[u].refs[edge].0 as usize;
                match color[v] {
                    Color::White => {
                        color[v] = Color::Gray;
                        parent[v] = Some(u);
                        stack.push((v, 0));
                    }
                    Color::Gray => {
                        // Back edge u -> v closes a cycle; walk parents
                        // from u back to v.
                        let mut path = vec![self.nodes[v].rid];
                        let mut cur = u;
                        while cur != v {
                            path.push(self.nodes[cur].rid);
                            cur = match parent[cur] {
                                Some(p) => p,
                                None => break,
                            };
                        }
                        path.reverse();
                        return Some(path);
                    }
                    Color::Black => {}
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oms_schemas::{
        Cardinality, EntityHeader, EntityStatus, LinkTypeSpec, ObjectTypeSpec, Visibility,
    };

    fn header(api_name: &str) -> EntityHeader {
        EntityHeader {
            rid: Uuid::new_v4(),
            api_name: api_name.to_string(),
            display_name: api_name.to_string(),
            status: EntityStatus::Active,
            visibility: Visibility::Normal,
            created_at_utc: Utc::now(),
            created_by: "test".to_string(),
            updated_at_utc: Utc::now(),
            updated_by: "test".to_string(),
        }
    }

    fn object(api_name: &str, implements: Vec<Uuid>) -> SchemaEntity {
        SchemaEntity::ObjectType(ObjectTypeSpec {
            header: header(api_name),
            implements,
            description: None,
        })
    }

    fn link(api_name: &str, source: Uuid, target: Uuid) -> SchemaEntity {
        SchemaEntity::LinkType(LinkTypeSpec {
            header: header(api_name),
            source_rid: source,
            target_rid: target,
            cardinality: Cardinality::OneToMany,
        })
    }

    #[test]
    fn acyclic_graph_reports_no_cycle() {
        let a = object("A", vec![]);
        let b = object("B", vec![]);
        let l = link("a_to_b", a.rid(), b.rid());
        let g = ChangeGraph::build(&[a, b, l]);
        assert!(g.find_cycle().is_none());
    }

    #[test]
    fn implements_cycle_is_detected() {
        // Interfaces referencing each other through `implements` on object
        // types would be unusual; model the cycle directly with objects.
        let a_rid = Uuid::new_v4();
        let b_rid = Uuid::new_v4();

        let mut a = object("A", vec![b_rid]);
        a.header_mut().rid = a_rid;
        let mut b = object("B", vec![a_rid]);
        b.header_mut().rid = b_rid;

        let g = ChangeGraph::build(&[a, b]);
        let cycle = g.find_cycle().expect("cycle expected");
        assert!(cycle.contains(&a_rid) && cycle.contains(&b_rid));
    }

    #[test]
    fn dangling_references_are_ignored_by_the_graph() {
        let a = object("A", vec![Uuid::new_v4()]);
        let g = ChangeGraph::build(&[a]);
        assert_eq!(g.len(), 1);
        assert!(g.find_cycle().is_none());
    }
}
