// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filter graph: minimum-cost converter pipelines.
//!
//! Nodes are MIME types plus one synthetic sink per destination; edges
//! come from global converter rules and per-destination filter
//! declarations. Wildcard sources expand at build time against every
//! known concrete type. Raw input never consults the graph; it is its
//! own zero-length pipeline.

use crate::config::ConvertRule;
use spool_core::{Destination, MimePattern, MimeType};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("no conversion path from {src} to \"{dest}\"")]
    NoPath { src: String, dest: String },
}

/// One converter invocation in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub program: String,
    pub cost: u32,
    /// Scheduling priority hint for the spawned process.
    pub nice: i32,
    /// Takes the input as a file-name argument instead of stdin.
    pub file_args: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    Type(MimeType),
    Sink(String),
}

#[derive(Debug, Clone)]
struct Edge {
    to: Node,
    cost: u32,
    /// `None` for direct-accept edges (no converter runs).
    stage: Option<Stage>,
}

/// The built conversion graph. Rebuilt whenever converter rules or
/// destination capabilities change; small enough that rebuilds are free.
#[derive(Debug, Default)]
pub struct FilterGraph {
    adjacency: HashMap<Node, Vec<Edge>>,
}

impl FilterGraph {
    /// Build the graph from global converter rules and the current
    /// destinations.
    pub fn build<'a>(
        converters: &[ConvertRule],
        dests: impl Iterator<Item = &'a Destination> + Clone,
    ) -> Self {
        let mut graph = FilterGraph::default();

        // Known concrete types: every concrete source/dest mentioned in
        // declarations plus every destination input format. Wildcards
        // expand against this set.
        let mut known: Vec<MimeType> = Vec::new();
        let mut remember = |t: MimeType| {
            if !known.contains(&t) {
                known.push(t);
            }
        };
        for rule in converters {
            if let Ok(t) = MimeType::parse(&rule.source) {
                remember(t);
            }
            if let Ok(t) = MimeType::parse(&rule.dest) {
                remember(t);
            }
        }
        for dest in dests.clone() {
            for format in &dest.capability.input_formats {
                if let Ok(t) = MimeType::parse(format) {
                    remember(t);
                }
            }
            for decl in &dest.capability.filters {
                if let Ok(t) = MimeType::parse(&decl.source) {
                    remember(t);
                }
            }
        }

        for rule in converters {
            let Ok(to) = MimeType::parse(&rule.dest) else { continue };
            let stage = Stage {
                program: rule.program.clone(),
                cost: rule.cost,
                nice: rule.nice,
                file_args: rule.file_args,
            };
            graph.add_pattern_edges(&rule.source, &known, Node::Type(to), rule.cost, Some(stage));
        }

        for dest in dests {
            let sink = Node::Sink(dest.name.to_lowercase());
            // Directly-accepted formats cost nothing.
            for format in &dest.capability.input_formats {
                if let Ok(t) = MimeType::parse(format) {
                    graph.add_edge(Node::Type(t), Edge { to: sink.clone(), cost: 0, stage: None });
                }
            }
            // Device-specific filter declarations terminate at the sink.
            for decl in &dest.capability.filters {
                let stage = Stage {
                    program: decl.program.clone(),
                    cost: decl.cost,
                    nice: decl.nice,
                    file_args: decl.file_args,
                };
                graph.add_pattern_edges(&decl.source, &known, sink.clone(), decl.cost, Some(stage));
            }
        }

        graph
    }

    fn add_pattern_edges(
        &mut self,
        source: &str,
        known: &[MimeType],
        to: Node,
        cost: u32,
        stage: Option<Stage>,
    ) {
        match MimePattern::parse(source) {
            Ok(pattern) if pattern.sub_type.is_none() => {
                for t in known.iter().filter(|t| pattern.matches(t)) {
                    self.add_edge(
                        Node::Type(t.clone()),
                        Edge { to: to.clone(), cost, stage: stage.clone() },
                    );
                }
            }
            Ok(_) => {
                if let Ok(t) = MimeType::parse(source) {
                    self.add_edge(Node::Type(t), Edge { to, cost, stage });
                }
            }
            Err(_) => {}
        }
    }

    fn add_edge(&mut self, from: Node, edge: Edge) {
        self.adjacency.entry(from).or_default().push(edge);
    }

    /// Minimum-cost pipeline from `src` to the destination's sink.
    ///
    /// Returns the ordered converter list; empty when the destination
    /// accepts the type directly. Raw input always short-circuits to the
    /// empty pipeline regardless of declared converters.
    pub fn pipeline(&self, src: &MimeType, dest: &Destination) -> Result<Vec<Stage>, FilterError> {
        if src.is_raw() {
            return Ok(Vec::new());
        }
        let target = Node::Sink(dest.name.to_lowercase());
        let start = Node::Type(src.clone());

        // Dijkstra over a graph this small needs no heap; the settled
        // scan keeps discovery order as the tie-break, so equal-cost
        // paths resolve to the first-declared edges.
        struct Entry {
            node: Node,
            cost: u32,
            settled: bool,
            prev: Option<(usize, Option<Stage>)>,
        }
        let mut entries: Vec<Entry> = vec![Entry { node: start, cost: 0, settled: false, prev: None }];

        loop {
            let next = entries
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.settled)
                .min_by_key(|(i, e)| (e.cost, *i))
                .map(|(i, _)| i);
            let Some(current) = next else { break };
            entries[current].settled = true;

            if entries[current].node == target {
                let mut stages = Vec::new();
                let mut at = current;
                while let Some((prev, stage)) = entries[at].prev.clone() {
                    if let Some(stage) = stage {
                        stages.push(stage);
                    }
                    at = prev;
                }
                stages.reverse();
                return Ok(stages);
            }

            let node = entries[current].node.clone();
            let base_cost = entries[current].cost;
            let Some(edges) = self.adjacency.get(&node) else { continue };
            for edge in edges {
                let cost = base_cost + edge.cost;
                match entries.iter().position(|e| e.node == edge.to) {
                    Some(i) => {
                        if !entries[i].settled && cost < entries[i].cost {
                            entries[i].cost = cost;
                            entries[i].prev = Some((current, edge.stage.clone()));
                        }
                    }
                    None => entries.push(Entry {
                        node: edge.to.clone(),
                        cost,
                        settled: false,
                        prev: Some((current, edge.stage.clone())),
                    }),
                }
            }
        }

        Err(FilterError::NoPath { src: src.to_string(), dest: dest.name.clone() })
    }
}

#[cfg(test)]
#[path = "filters_tests.rs"]
mod tests;
