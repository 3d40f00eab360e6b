// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow model: steps, actions, and validated workflow definitions.
//!
//! A workflow is a named set of actions; each action is an ordered list
//! of steps plus transition edges (`next_action`, `on_error_action`).
//! Every step declares the context keys it reads up front, so a
//! definition can be validated before anything runs.

pub mod manager;
pub mod runner;

pub use self::manager::WorkflowRunnerManager;
pub use self::runner::{ExceptionInfo, NoopHooks, RunOutcome, RunnerHooks, WorkflowRunner};

use std::any::type_name;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::ContextValue;
use crate::error::CoreError;

/// One declared input of a step: the context key and the type it is
/// read as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    /// Context key the step reads.
    pub name: &'static str,
    /// Type the key is decoded as, captured from `std::any::type_name`.
    pub type_name: &'static str,
}

impl InputSpec {
    /// Declare an input of type `T` under `name`.
    pub fn of<T>(name: &'static str) -> Self {
        Self {
            name,
            type_name: type_name::<T>(),
        }
    }
}

/// Inputs gathered from the context for one step invocation.
///
/// Values were already type-checked against the step's [`InputSpec`]s
/// when they were gathered; the typed getter re-checks on decode so a
/// step cannot read an input under a type it never declared.
#[derive(Debug, Clone, Default)]
pub struct StepInputs {
    values: HashMap<String, ContextValue>,
}

impl StepInputs {
    pub(crate) fn new(values: HashMap<String, ContextValue>) -> Self {
        Self { values }
    }

    /// Read the input under `key` as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CoreError> {
        let Some(value) = self.values.get(key) else {
            return Err(CoreError::NotInContext {
                key: key.to_string(),
            });
        };
        value.decode(key)
    }
}

/// Outputs produced by one step invocation, merged into the context
/// after the step returns.
#[derive(Debug, Clone, Default)]
pub struct StepOutputs {
    values: HashMap<String, ContextValue>,
}

impl StepOutputs {
    /// An empty output set.
    pub fn none() -> Self {
        Self::default()
    }

    /// Record an output under `key`.
    pub fn set<T: Serialize>(mut self, key: &str, value: &T) -> Result<Self, CoreError> {
        self.values
            .insert(key.to_string(), ContextValue::of(value)?);
        Ok(self)
    }

    pub(crate) fn into_values(self) -> HashMap<String, ContextValue> {
        self.values
    }
}

/// One unit of work inside an action.
///
/// Implementations declare their inputs statically via [`Step::input_spec`];
/// the runner gathers and type-checks those keys before calling
/// [`Step::run`] and merges the returned outputs into the context after.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable step name, recorded in the context while the step runs.
    fn name(&self) -> &'static str;

    /// Context keys this step reads, with their expected types.
    fn input_spec(&self) -> Vec<InputSpec> {
        Vec::new()
    }

    /// Execute the step. Any error is captured as the run's exception
    /// info and triggers the owning action's error transition.
    async fn run(&self, inputs: StepInputs) -> anyhow::Result<StepOutputs>;
}

/// A named, ordered sequence of steps plus transition edges.
#[derive(Clone)]
pub struct Action {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    next_action: Option<String>,
    on_error_action: Option<String>,
}

impl Action {
    /// Start building an action named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            next_action: None,
            on_error_action: None,
        }
    }

    /// Append a step.
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Action to run after this one completes successfully.
    pub fn next(mut self, action: impl Into<String>) -> Self {
        self.next_action = Some(action.into());
        self
    }

    /// Action to run if any step of this one fails.
    pub fn on_error(mut self, action: impl Into<String>) -> Self {
        self.on_error_action = Some(action.into());
        self
    }

    /// The action's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub(crate) fn next_action(&self) -> Option<&str> {
        self.next_action.as_deref()
    }

    pub(crate) fn on_error_action(&self) -> Option<&str> {
        self.on_error_action.as_deref()
    }
}

/// A validated workflow definition: actions indexed by name plus the
/// declared start action.
#[derive(Clone)]
pub struct Workflow {
    actions: HashMap<String, Action>,
    start_action: String,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("start_action", &self.start_action)
            .finish()
    }
}

impl Workflow {
    /// Start building a workflow.
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::default()
    }

    /// The declared start action.
    pub fn start_action(&self) -> &str {
        &self.start_action
    }

    /// Look up an action; `ActionNotRegistered` if absent.
    pub fn action(&self, name: &str) -> Result<&Action, CoreError> {
        self.actions.get(name).ok_or(CoreError::ActionNotRegistered {
            action: name.to_string(),
        })
    }

    /// Whether `name` resolves to a registered action.
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

/// Builder assembling and validating a [`Workflow`].
///
/// Validation happens in [`WorkflowBuilder::build`]:
/// - at least one action, action names unique and non-empty
/// - every `next_action` / `on_error_action` edge resolves
/// - the start action is declared and exists
/// - step names are non-empty and unique within their action
/// - no step declares the same input name twice
#[derive(Default)]
pub struct WorkflowBuilder {
    actions: Vec<Action>,
    start_action: Option<String>,
}

impl WorkflowBuilder {
    /// Register an action.
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Declare the action the workflow starts from.
    pub fn start_with(mut self, action: impl Into<String>) -> Self {
        self.start_action = Some(action.into());
        self
    }

    /// Validate and assemble the workflow.
    pub fn build(self) -> Result<Workflow, CoreError> {
        if self.actions.is_empty() {
            return Err(CoreError::InvalidWorkflow {
                reason: "workflow has no actions".to_string(),
            });
        }

        let mut actions = HashMap::with_capacity(self.actions.len());
        for action in self.actions {
            if action.name.is_empty() {
                return Err(CoreError::InvalidWorkflow {
                    reason: "action name must not be empty".to_string(),
                });
            }

            let mut step_names = HashSet::new();
            for step in &action.steps {
                if step.name().is_empty() {
                    return Err(CoreError::InvalidWorkflow {
                        reason: format!("action '{}' has a step with an empty name", action.name),
                    });
                }
                if !step_names.insert(step.name()) {
                    return Err(CoreError::InvalidWorkflow {
                        reason: format!(
                            "action '{}' declares step '{}' more than once",
                            action.name,
                            step.name()
                        ),
                    });
                }

                let mut input_names = HashSet::new();
                for spec in step.input_spec() {
                    if spec.name.is_empty() {
                        return Err(CoreError::InvalidWorkflow {
                            reason: format!(
                                "step '{}' declares an input with an empty name",
                                step.name()
                            ),
                        });
                    }
                    if !input_names.insert(spec.name) {
                        return Err(CoreError::InvalidWorkflow {
                            reason: format!(
                                "step '{}' declares input '{}' more than once",
                                step.name(),
                                spec.name
                            ),
                        });
                    }
                }
            }

            if actions.insert(action.name.clone(), action).is_some() {
                return Err(CoreError::InvalidWorkflow {
                    reason: "action names must be unique".to_string(),
                });
            }
        }

        let Some(start_action) = self.start_action else {
            return Err(CoreError::InvalidWorkflow {
                reason: "no start action declared".to_string(),
            });
        };
        if !actions.contains_key(&start_action) {
            return Err(CoreError::ActionNotRegistered {
                action: start_action,
            });
        }

        // every transition edge must resolve
        for action in actions.values() {
            for edge in [action.next_action(), action.on_error_action()]
                .into_iter()
                .flatten()
            {
                if !actions.contains_key(edge) {
                    return Err(CoreError::ActionNotRegistered {
                        action: edge.to_string(),
                    });
                }
            }
        }

        Ok(Workflow {
            actions,
            start_action,
        })
    }
}
