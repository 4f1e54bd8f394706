//! Conditional routing between groups of steps.

use nagare_core::{ConfigError, Context, Guard, Step};
use std::fmt;
use std::sync::Arc;

/// Name given to the default branch of a group.
pub const OTHERWISE: &str = "otherwise";

/// One entry of a workflow's unit list.
#[derive(Debug, Clone)]
pub enum Unit {
    /// A single step.
    Step(Step),
    /// A decision point resolving to one branch.
    Group(BranchGroup),
}

impl Unit {
    /// Returns the step or group name.
    pub fn name(&self) -> &str {
        match self {
            Unit::Step(step) => step.name().as_str(),
            Unit::Group(group) => group.name(),
        }
    }
}

/// A guarded (or default) path of units within a [`BranchGroup`].
#[derive(Clone)]
pub struct Branch {
    name: String,
    guard: Option<Guard>,
    units: Vec<Unit>,
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("default", &self.is_default())
            .field("units", &self.units)
            .finish()
    }
}

impl Branch {
    /// Returns the branch name (`on_<n>` or `otherwise`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` for the unguarded `otherwise` branch.
    pub fn is_default(&self) -> bool {
        self.guard.is_none()
    }

    /// Returns the units executed when this branch is taken.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub(crate) fn units_mut(&mut self) -> &mut Vec<Unit> {
        &mut self.units
    }

    fn matches(&self, ctx: &Context) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard(ctx))
    }
}

/// Mutually exclusive branches evaluated at one decision point.
///
/// Guarded branches are tried in declaration order and the first match
/// wins; the `otherwise` branch is only taken when none match.
///
/// ```
/// use nagare::{Actor, BranchGroup, Context};
///
/// let mut group = BranchGroup::new("payment");
/// group.add_branch(|ctx: &Context| ctx.get_as::<String>("method").as_deref() == Some("paypal"));
/// group.add_branch(|ctx: &Context| ctx.get_as::<String>("method").as_deref() == Some("card"));
/// group.add_default().expect("first otherwise");
///
/// let mut ctx = Context::new(Actor::system());
/// ctx.insert("method", "card");
/// assert_eq!(group.resolve(&ctx).map(|b| b.name()), Some("on_2"));
///
/// ctx.insert("method", "cash");
/// assert_eq!(group.resolve(&ctx).map(|b| b.name()), Some("otherwise"));
/// ```
#[derive(Debug, Clone)]
pub struct BranchGroup {
    name: String,
    branches: Vec<Branch>,
    default: Option<Branch>,
    counter: usize,
}

impl BranchGroup {
    /// Creates an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branches: Vec::new(),
            default: None,
            counter: 0,
        }
    }

    /// Returns the group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a guarded branch named `on_<n>` and returns it.
    pub fn add_branch<F>(&mut self, predicate: F) -> &mut Branch
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.counter += 1;
        let index = self.branches.len();
        self.branches.push(Branch {
            name: format!("on_{}", self.counter),
            guard: Some(Arc::new(predicate)),
            units: Vec::new(),
        });
        &mut self.branches[index]
    }

    /// Registers the `otherwise` branch and returns it.
    ///
    /// A group has at most one `otherwise` branch.
    pub fn add_default(&mut self) -> Result<&mut Branch, ConfigError> {
        if self.default.is_some() {
            return Err(ConfigError::DuplicateOtherwise {
                group: self.name.clone(),
            });
        }
        Ok(self.default.insert(Branch {
            name: OTHERWISE.to_string(),
            guard: None,
            units: Vec::new(),
        }))
    }

    /// Returns the guarded branches in declaration order.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Returns the `otherwise` branch, if declared.
    pub fn default_branch(&self) -> Option<&Branch> {
        self.default.as_ref()
    }

    /// Returns `true` if neither guarded nor default branches exist.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.default.is_none()
    }

    /// Picks the branch to run for the current context.
    ///
    /// Predicates after the first match are never evaluated.
    pub fn resolve(&self, ctx: &Context) -> Option<&Branch> {
        self.branches
            .iter()
            .find(|branch| branch.matches(ctx))
            .or(self.default.as_ref())
    }

    pub(crate) fn last_branch_mut(&mut self) -> Option<&mut Branch> {
        self.branches.last_mut()
    }

    pub(crate) fn default_mut(&mut self) -> Option<&mut Branch> {
        self.default.as_mut()
    }

    /// Trace label for a branch of this group.
    pub fn label(&self, branch: &Branch) -> String {
        format!("{}:{}", self.name, branch.name)
    }
}
