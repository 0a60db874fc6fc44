use crate::database::{ModDatabase, ModItem};
use std::collections::HashSet;

/// Answers "which mods (transitively) depend on X", used to warn before
/// disabling or removing a shared dependency.
pub struct ReverseDependencySearch<'a> {
    db: &'a ModDatabase,
}

impl<'a> ReverseDependencySearch<'a> {
    pub fn new(db: &'a ModDatabase) -> Self {
        Self { db }
    }

    /// Every mod whose dependency closure contains `target`, regardless of
    /// install state.
    pub fn dependents(&self, target: &str) -> Vec<&'a ModItem> {
        self.db
            .items()
            .filter(|item| self.depends_on(item, target))
            .collect()
    }

    /// Same, restricted to currently enabled mods.
    pub fn enabled_dependents(&self, target: &str) -> Vec<&'a ModItem> {
        self.db
            .items()
            .filter(|item| item.enabled() && self.depends_on(item, target))
            .collect()
    }

    fn depends_on(&self, item: &ModItem, target: &str) -> bool {
        let mut visited = HashSet::new();
        self.walk(item, target, &mut visited)
    }

    // The catalog is validated acyclic, but the visited set makes
    // termination independent of that.
    fn walk(&self, item: &ModItem, target: &str, visited: &mut HashSet<&'a str>) -> bool {
        for name in &item.dependencies {
            if name == target {
                return true;
            }

            let Some(dependency) = self.db.get(name) else {
                continue;
            };
            if !visited.insert(dependency.name.as_str()) {
                continue;
            }
            if self.walk(dependency, target, visited) {
                return true;
            }
        }

        false
    }
}
