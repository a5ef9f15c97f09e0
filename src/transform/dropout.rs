//! Training-subgraph elimination.
//!
//! Dropout clusters exist only for training: at inference they are an
//! identity over their data input. This pass finds clusters by name
//! pattern, checks that each one is fed by exactly one external tensor
//! (side inputs such as keep probabilities excluded), rewires every
//! outside consumer to that tensor and drops the cluster.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

use super::{PassConfig, Transform};
use crate::error::{CompileError, CompileResult};
use crate::ir::{Graph, NodeId, TensorRef};

/// Default cluster pattern. Group 1 is the cluster key (the namescope).
pub const DEFAULT_NAME_PATTERN: &str = r"(dropout[_\w\d]*)/.*";

/// Default side-input pattern, matched against producer names.
pub const DEFAULT_IGNORE_PATTERN: &str = "keep_prob.*";

pub struct Dropout;

impl Dropout {
    /// Cluster and side-input names are prefix matches.
    fn compile_anchored(pattern: &str, option: &str) -> CompileResult<Regex> {
        Regex::new(&format!(r"\A(?:{pattern})")).map_err(|e| CompileError::MalformedPassSpec {
            spec: format!("dropout({option}={pattern})"),
            reason: e.to_string(),
        })
    }
}

impl Transform for Dropout {
    fn name(&self) -> &'static str {
        "dropout"
    }

    fn describe(&self) -> &'static str {
        "remove training-only dropout subgraphs and rewire their consumers"
    }

    fn apply(&self, graph: Graph, cfg: &PassConfig) -> CompileResult<Graph> {
        let pattern = cfg.get_or("name_pattern", DEFAULT_NAME_PATTERN);
        let cluster_re = Self::compile_anchored(pattern, "name_pattern")?;
        let groups = cluster_re.captures_len() - 1;
        if groups != 1 {
            return Err(CompileError::MalformedPassSpec {
                spec: format!("dropout(name_pattern={pattern})"),
                reason: format!("pattern must have exactly 1 capture group, found {groups}"),
            });
        }
        let ignore = cfg.get_or("ignore_pattern", DEFAULT_IGNORE_PATTERN);
        let ignore_re = Self::compile_anchored(ignore, "ignore_pattern")?;

        // Cluster membership by captured key.
        let mut clusters: BTreeMap<String, BTreeSet<NodeId>> = BTreeMap::new();
        for (id, node) in graph.nodes() {
            if let Some(caps) = cluster_re.captures(&node.name) {
                if let Some(key) = caps.get(1) {
                    clusters
                        .entry(key.as_str().to_string())
                        .or_default()
                        .insert(id);
                }
            }
        }
        if clusters.is_empty() {
            return Ok(graph);
        }

        let all_members: BTreeSet<NodeId> = clusters.values().flatten().copied().collect();
        let mut dropped: BTreeSet<NodeId> = all_members.clone();
        let mut rewire: BTreeMap<TensorRef, TensorRef> = BTreeMap::new();

        for (key, members) in &clusters {
            // The unique tensor feeding this cluster from outside it.
            let mut external: Vec<TensorRef> = Vec::new();
            for &member in members {
                for input in &graph.node(member).inputs {
                    if members.contains(&input.producer) {
                        continue;
                    }
                    if ignore_re.is_match(&graph.node(input.producer).name) {
                        continue;
                    }
                    if !external.contains(input) {
                        external.push(*input);
                    }
                }
            }
            if external.len() != 1 {
                return Err(CompileError::AmbiguousClusterInput {
                    cluster: key.clone(),
                    found: external.len(),
                });
            }
            let source = external[0];

            // Everything the cluster produced now reads from its input.
            for &member in members {
                for slot in 0..graph.node(member).outputs.len() {
                    rewire.insert(TensorRef::new(member, slot as u16), source);
                }
            }

            // Side-input producers feeding only dropped nodes go with it.
            for &member in members {
                for input in &graph.node(member).inputs {
                    if members.contains(&input.producer) {
                        continue;
                    }
                    if !ignore_re.is_match(&graph.node(input.producer).name) {
                        continue;
                    }
                    let externally_consumed = graph.nodes().any(|(cid, cnode)| {
                        !all_members.contains(&cid)
                            && cnode.inputs.iter().any(|r| r.producer == input.producer)
                    });
                    if !externally_consumed {
                        dropped.insert(input.producer);
                    }
                }
            }
        }

        log::info!(
            "dropout: removing {} node(s) across {} cluster(s)",
            dropped.len(),
            clusters.len()
        );
        let keep: BTreeSet<NodeId> = graph
            .nodes()
            .map(|(id, _)| id)
            .filter(|id| !dropped.contains(id))
            .collect();
        graph.retain_nodes(&keep, &rewire)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
