//! The [`GraphState`] trait - the engine's bound on user state types.
//!
//! The engine is generic over a state value `S` that flows through nodes by
//! value. `GraphState` collects the capabilities the runner needs:
//! cloning for fork branches, merging branch results, and a serde bound so
//! state can be checkpointed through the self-describing JSON codec.
//!
//! Both methods have defaults, so opting a type in is one line:
//!
//! ```rust
//! use graphflow_core::GraphState;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct PipelineState {
//!     count: i64,
//!     notes: Vec<String>,
//! }
//!
//! impl GraphState for PipelineState {}
//! ```
//!
//! Override [`GraphState::clone_for_branch`] to give each fork branch
//! customized state (an isolated scratch directory, a branch tag), and
//! [`GraphState::merge_branches`] when the default field-wise merge does not
//! fit the type.

use crate::error::{GraphError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// State types executable by the engine.
pub trait GraphState:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Produce this branch's copy of the state when a fork fans out.
    ///
    /// The default is a structural clone through the JSON codec, which also
    /// verifies the state round-trips the way checkpointing will need it to.
    /// `branch_id` is the branch's entry node id.
    fn clone_for_branch(&self, branch_id: &str) -> Result<Self> {
        let encoded = serde_json::to_value(self).map_err(|e| {
            GraphError::state_error(
                None,
                format!("branch '{branch_id}' clone failed to encode state: {e}"),
            )
        })?;
        serde_json::from_value(encoded).map_err(|e| {
            GraphError::state_error(
                None,
                format!("branch '{branch_id}' clone failed to decode state: {e}"),
            )
        })
    }

    /// Merge branch results back into a single state, `self` being the
    /// pre-fork base.
    ///
    /// The default is field-wise last-writer-wins over the JSON encoding:
    /// branches are visited in ascending branch-id order, and every
    /// top-level field that differs from the base is adopted from the
    /// visiting branch. When several branches write the same field the
    /// highest branch id wins - deterministic, but usually a sign the type
    /// wants a custom merge or an
    /// [`on_join`](crate::runner::BranchHook::on_join) veto.
    ///
    /// Non-object states (scalars, arrays) fall back to whole-value
    /// last-writer-wins in the same branch order.
    fn merge_branches(&self, branches: &BTreeMap<String, Self>) -> Result<Self> {
        let base = serde_json::to_value(self)?;

        let merged = match &base {
            serde_json::Value::Object(base_fields) => {
                let mut fields = base_fields.clone();
                for state in branches.values() {
                    let encoded = serde_json::to_value(state)?;
                    let branch_fields = match encoded {
                        serde_json::Value::Object(map) => map,
                        other => {
                            return Err(GraphError::state_error(
                                None,
                                format!("branch state is not an object: {other}"),
                            ))
                        }
                    };
                    for (key, value) in branch_fields {
                        if base_fields.get(&key) != Some(&value) {
                            fields.insert(key, value);
                        }
                    }
                }
                serde_json::Value::Object(fields)
            }
            _ => {
                let mut winner = base.clone();
                for state in branches.values() {
                    let encoded = serde_json::to_value(state)?;
                    if encoded != base {
                        winner = encoded;
                    }
                }
                winner
            }
        };

        Ok(serde_json::from_value(merged)?)
    }
}

impl GraphState for serde_json::Value {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Totals {
        left: i64,
        right: i64,
        sum: i64,
    }

    impl GraphState for Totals {}

    #[test]
    fn default_branch_clone_is_structural() {
        let state = Totals {
            left: 1,
            right: 2,
            sum: 0,
        };
        let cloned = state.clone_for_branch("left_branch").unwrap();
        assert_eq!(cloned, state);
    }

    #[test]
    fn merge_adopts_fields_changed_by_single_branches() {
        let base = Totals {
            left: 0,
            right: 0,
            sum: 0,
        };
        let mut branches = BTreeMap::new();
        branches.insert(
            "a".to_string(),
            Totals {
                left: 1,
                right: 0,
                sum: 0,
            },
        );
        branches.insert(
            "b".to_string(),
            Totals {
                left: 0,
                right: 2,
                sum: 0,
            },
        );

        let merged = base.merge_branches(&branches).unwrap();
        assert_eq!(
            merged,
            Totals {
                left: 1,
                right: 2,
                sum: 0,
            }
        );
    }

    #[test]
    fn overlapping_writes_resolve_to_highest_branch_id() {
        let base = json!({"value": 0});
        let mut branches = BTreeMap::new();
        branches.insert("a".to_string(), json!({"value": 1}));
        branches.insert("b".to_string(), json!({"value": 2}));

        let merged = base.merge_branches(&branches).unwrap();
        assert_eq!(merged, json!({"value": 2}));
    }

    #[test]
    fn merge_is_independent_of_insertion_order() {
        let base = json!({"x": 0, "y": 0});
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), json!({"x": 1, "y": 0}));
        forward.insert("b".to_string(), json!({"x": 0, "y": 2}));

        let mut reversed = BTreeMap::new();
        reversed.insert("b".to_string(), json!({"x": 0, "y": 2}));
        reversed.insert("a".to_string(), json!({"x": 1, "y": 0}));

        assert_eq!(
            base.merge_branches(&forward).unwrap(),
            base.merge_branches(&reversed).unwrap()
        );
    }

    #[test]
    fn branch_may_introduce_new_fields() {
        let base = json!({"x": 0});
        let mut branches = BTreeMap::new();
        branches.insert("a".to_string(), json!({"x": 0, "extra": true}));

        let merged = base.merge_branches(&branches).unwrap();
        assert_eq!(merged, json!({"x": 0, "extra": true}));
    }

    #[test]
    fn scalar_states_use_whole_value_merge() {
        let base = json!(0);
        let mut branches = BTreeMap::new();
        branches.insert("a".to_string(), json!(0));
        branches.insert("b".to_string(), json!(7));

        let merged = base.merge_branches(&branches).unwrap();
        assert_eq!(merged, json!(7));
    }
}
