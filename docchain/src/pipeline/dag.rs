//! Stage graph resolution.
//!
//! An edge runs from a referenced stage to the stage that binds it. A
//! revision stage also gets an edge to every stage defined after it that
//! binds an artifact it supersedes, so those stages read the revised value.
//! Order is Kahn's algorithm with ties broken by definition order.

use crate::contracts::{ContractRegistry, FieldKind};
use crate::errors::{
    codes, ContractErrorInfo, CycleDetectedError, DocchainError, PipelineValidationError,
};
use crate::stages::{InputBinding, StageDefinition};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

/// A validated, topologically ordered set of stage definitions.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Definitions in definition order.
    stages: Vec<StageDefinition>,
    /// Stage name to definition index.
    index: HashMap<String, usize>,
    /// Predecessors of each stage, explicit and implicit.
    dependencies: Vec<Vec<usize>>,
    /// Execution order as definition indices.
    execution_order: Vec<usize>,
    /// Contracts the stages were validated against.
    registry: Arc<ContractRegistry>,
}

impl StageGraph {
    /// Resolves a set of definitions into an executable graph.
    ///
    /// All checks run here, before any backend call: contract and stage
    /// references, bound fields, revision shapes, cycles and definition
    /// order.
    ///
    /// # Errors
    ///
    /// - [`DocchainError::CyclicDependency`] when bindings form a cycle
    /// - [`DocchainError::Definition`] for every other malformed definition
    pub fn from_definitions(
        name: impl Into<String>,
        stages: Vec<StageDefinition>,
        registry: Arc<ContractRegistry>,
    ) -> Result<Self, DocchainError> {
        let name = name.into();
        if stages.is_empty() {
            return Err(PipelineValidationError::coded(
                codes::EMPTY,
                format!("Pipeline '{name}' has no stages"),
            )
            .into());
        }

        let mut index = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            stage.validate()?;
            if index.insert(stage.name.clone(), i).is_some() {
                return Err(PipelineValidationError::coded(
                    codes::DUPLICATE_STAGE,
                    format!("Stage '{}' is defined more than once", stage.name),
                )
                .with_stages(vec![stage.name.clone()])
                .into());
            }
        }

        for stage in &stages {
            registry
                .require(&stage.output_contract)
                .map_err(|e| e.with_stages(vec![stage.name.clone()]))?;
        }
        for stage in &stages {
            check_bindings(stage, &stages, &index, &registry)?;
            check_revision(stage, &stages, &index, &registry)?;
        }

        let dependencies = build_dependencies(&stages, &index);
        let execution_order = topological_order(&stages, &dependencies)?;
        check_definition_order(&stages, &dependencies)?;

        Ok(Self {
            name,
            stages,
            index,
            dependencies,
            execution_order,
            registry,
        })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.execution_order
            .iter()
            .map(|&i| self.stages[i].name.as_str())
            .collect()
    }

    /// Definitions in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.execution_order.iter().map(|&i| &self.stages[i])
    }

    /// Looks up a definition by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Stages that must run before `name`, including implicit revision edges.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                self.dependencies[i]
                    .iter()
                    .map(|&d| self.stages[d].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every initial input key bound by some stage.
    #[must_use]
    pub fn required_inputs(&self) -> BTreeSet<&str> {
        self.stages.iter().flat_map(StageDefinition::input_keys).collect()
    }

    /// The registry the graph was validated against.
    #[must_use]
    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.registry
    }
}

fn check_bindings(
    stage: &StageDefinition,
    stages: &[StageDefinition],
    index: &HashMap<String, usize>,
    registry: &ContractRegistry,
) -> Result<(), PipelineValidationError> {
    for param in &stage.params {
        let Some(target) = param.binding.referenced_stage() else {
            continue;
        };
        let Some(&t) = index.get(target) else {
            return Err(missing_dependency(&stage.name, target));
        };

        if let Some(field) = param.binding.referenced_field() {
            let contract = registry.require(&stages[t].output_contract)?;
            if contract.get(field).is_none() {
                let info = ContractErrorInfo::new(
                    codes::UNKNOWN_FIELD,
                    format!(
                        "Stage '{}' binds field '{field}' which contract '{}' does not declare",
                        stage.name, contract.name
                    ),
                )
                .with_context_entry("available", contract.field_names().join(", "))
                .with_default_hint();
                return Err(PipelineValidationError::new(info.summary.clone())
                    .with_stages(vec![stage.name.clone(), target.to_string()])
                    .with_error_info(info));
            }
        }
    }
    Ok(())
}

fn check_revision(
    stage: &StageDefinition,
    stages: &[StageDefinition],
    index: &HashMap<String, usize>,
    registry: &ContractRegistry,
) -> Result<(), PipelineValidationError> {
    if !stage.is_revision() {
        return Ok(());
    }
    let own = registry.require(&stage.output_contract)?;
    let bound = stage.dependencies();

    for entry in stage.supersedes() {
        let Some(&t) = index.get(&entry.artifact) else {
            return Err(missing_dependency(&stage.name, &entry.artifact));
        };
        let expected = &stages[t].output_contract;

        let mirrors = matches!(
            own.get(&entry.field).map(|f| &f.kind),
            Some(FieldKind::Record { contract }) if contract == expected
        );
        if !mirrors {
            return Err(PipelineValidationError::coded(
                codes::REVISION_SHAPE,
                format!(
                    "Field '{}' of revision '{}' must be a record of contract '{expected}' \
                     to supersede '{}'",
                    entry.field, stage.name, entry.artifact
                ),
            )
            .with_stages(vec![stage.name.clone(), entry.artifact.clone()]));
        }

        if !bound.contains(&entry.artifact.as_str()) {
            return Err(PipelineValidationError::coded(
                codes::REVISION_SHAPE,
                format!(
                    "Revision '{}' supersedes '{}' but does not bind it",
                    stage.name, entry.artifact
                ),
            )
            .with_stages(vec![stage.name.clone(), entry.artifact.clone()]));
        }
    }
    Ok(())
}

fn missing_dependency(stage: &str, target: &str) -> PipelineValidationError {
    let info = ContractErrorInfo::new(
        codes::MISSING_DEP,
        format!("Stage '{stage}' references unknown stage '{target}'"),
    )
    .with_context_entry("stage", stage)
    .with_context_entry("missing", target)
    .with_default_hint();

    PipelineValidationError::new(info.summary.clone())
        .with_stages(vec![stage.to_string(), target.to_string()])
        .with_error_info(info)
}

fn build_dependencies(stages: &[StageDefinition], index: &HashMap<String, usize>) -> Vec<Vec<usize>> {
    let mut dependencies: Vec<Vec<usize>> = stages
        .iter()
        .map(|stage| {
            stage
                .dependencies()
                .into_iter()
                .filter_map(|dep| index.get(dep).copied())
                .collect()
        })
        .collect();

    for (r, revision) in stages.iter().enumerate() {
        for entry in revision.supersedes() {
            for (s, later) in stages.iter().enumerate().skip(r + 1) {
                let reads_current = later.params.iter().any(|p| {
                    matches!(&p.binding, InputBinding::Artifact { stage, .. } if *stage == entry.artifact)
                });
                if reads_current && !dependencies[s].contains(&r) {
                    dependencies[s].push(r);
                }
            }
        }
    }
    dependencies
}

fn topological_order(
    stages: &[StageDefinition],
    dependencies: &[Vec<usize>],
) -> Result<Vec<usize>, CycleDetectedError> {
    let n = stages.len();
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, deps) in dependencies.iter().enumerate() {
        for &d in deps {
            dependents[d].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..n).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &j in &dependents[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    let unresolved: HashSet<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    let cycle = (0..n)
        .filter(|i| unresolved.contains(i))
        .find_map(|start| {
            dfs_cycle(start, dependencies, &unresolved, &mut visited, &mut HashSet::new(), &mut path)
        })
        .unwrap_or_else(|| {
            let mut remaining: Vec<usize> = unresolved.iter().copied().collect();
            remaining.sort_unstable();
            remaining
        });

    Err(CycleDetectedError::new(
        cycle.into_iter().map(|i| stages[i].name.clone()).collect(),
    ))
}

fn dfs_cycle(
    node: usize,
    dependencies: &[Vec<usize>],
    unresolved: &HashSet<usize>,
    visited: &mut HashSet<usize>,
    rec_stack: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    if !visited.insert(node) {
        return None;
    }
    rec_stack.insert(node);
    path.push(node);

    for &dep in dependencies[node].iter().filter(|d| unresolved.contains(d)) {
        if rec_stack.contains(&dep) {
            if let Some(start) = path.iter().position(|&n| n == dep) {
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
        } else if let Some(cycle) = dfs_cycle(dep, dependencies, unresolved, visited, rec_stack, path) {
            return Some(cycle);
        }
    }

    path.pop();
    rec_stack.remove(&node);
    None
}

fn check_definition_order(
    stages: &[StageDefinition],
    dependencies: &[Vec<usize>],
) -> Result<(), PipelineValidationError> {
    for (i, deps) in dependencies.iter().enumerate() {
        if let Some(&later) = deps.iter().find(|&&d| d > i) {
            return Err(PipelineValidationError::coded(
                codes::ORDER,
                format!(
                    "Stage '{}' references stage '{}' which is defined after it",
                    stages[i].name, stages[later].name
                ),
            )
            .with_stages(vec![stages[i].name.clone(), stages[later].name.clone()]));
        }
    }
    Ok(())
}
