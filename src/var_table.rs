use std::collections::HashMap;

/// Maps variable names to frame slots while a function is being generated.
///
/// Each nested block pushes an environment. Slot numbers come from one
/// counter per function that never goes back down, so sibling blocks never
/// share a slot.
#[derive(Debug, Default)]
pub struct VarTable {
    environments: Vec<HashMap<String, usize>>,
    total_vars: usize,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_environment(&mut self) {
        self.environments.push(HashMap::new());
    }

    pub fn pop_environment(&mut self) {
        self.environments.pop();
    }

    /// Binds `name` in the innermost environment and returns its slot.
    pub fn add(&mut self, name: &str) -> usize {
        if self.environments.is_empty() {
            self.push_environment();
        }
        let slot = self.total_vars;
        if let Some(environment) = self.environments.last_mut() {
            environment.insert(name.to_string(), slot);
        }
        self.total_vars += 1;
        slot
    }

    /// Resolves `name`, innermost environment first.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.environments
            .iter()
            .rev()
            .find_map(|environment| environment.get(name).copied())
    }

    /// Slot the next `add` will hand out.
    pub fn total_vars(&self) -> usize {
        self.total_vars
    }

    pub fn depth(&self) -> usize {
        self.environments.len()
    }
}
