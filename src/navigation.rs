use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::GenomeKey;
use crate::error::GenomeError;

/// A saved walk through the model tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTreePath {
    pub id: String,
    pub name: String,
    pub stops: Vec<PathStop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStop {
    pub model: GenomeKey,
    pub overlay: Option<String>,
}

impl PathStop {
    pub fn model(model: GenomeKey) -> Self {
        Self { model, overlay: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePathChange {
    pub orig: Option<UserTreePath>,
    pub new: Option<UserTreePath>,
}

/// Model and overlay shown when a file is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupView {
    pub model: Option<GenomeKey>,
    pub overlay: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupViewChange {
    pub orig: StartupView,
    pub new: StartupView,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    paths: BTreeMap<String, UserTreePath>,
    startup: StartupView,
}

impl Navigation {
    pub fn path(&self, id: &str) -> Option<&UserTreePath> {
        self.paths.get(id)
    }

    pub fn paths(&self) -> impl Iterator<Item = &UserTreePath> {
        self.paths.values()
    }

    pub fn startup_view(&self) -> &StartupView {
        &self.startup
    }

    pub fn add_path(&mut self, path: UserTreePath) -> Result<TreePathChange, GenomeError> {
        if self.paths.contains_key(&path.id) {
            return Err(GenomeError::duplicate("tree paths", &path.id));
        }
        self.paths.insert(path.id.clone(), path.clone());
        Ok(TreePathChange {
            orig: None,
            new: Some(path),
        })
    }

    pub fn remove_path(&mut self, id: &str) -> Result<TreePathChange, GenomeError> {
        let removed = self
            .paths
            .remove(id)
            .ok_or_else(|| GenomeError::missing("tree paths", "path", id))?;
        Ok(TreePathChange {
            orig: Some(removed),
            new: None,
        })
    }

    pub fn set_startup_view(&mut self, view: StartupView) -> StartupViewChange {
        let orig = std::mem::replace(&mut self.startup, view.clone());
        StartupViewChange { orig, new: view }
    }

    /// Rewrites every stop through `remap`; a `None` result drops the stop.
    /// Emits one record per path that changed.
    pub fn remap_stops<F>(&mut self, mut remap: F) -> Vec<TreePathChange>
    where
        F: FnMut(&GenomeKey) -> Option<Option<GenomeKey>>,
    {
        let mut changes = Vec::new();
        for path in self.paths.values_mut() {
            let orig = path.clone();
            let mut touched = false;
            let mut kept = Vec::with_capacity(path.stops.len());
            for stop in path.stops.drain(..) {
                match remap(&stop.model) {
                    None => kept.push(stop),
                    Some(Some(model)) => {
                        touched = true;
                        kept.push(PathStop { model, ..stop });
                    }
                    Some(None) => touched = true,
                }
            }
            path.stops = kept;
            if touched {
                changes.push(TreePathChange {
                    orig: Some(orig),
                    new: Some(path.clone()),
                });
            }
        }
        changes
    }

    /// Same contract as [`Navigation::remap_stops`] for the startup view.
    pub fn remap_startup<F>(&mut self, remap: F) -> Option<StartupViewChange>
    where
        F: FnOnce(&GenomeKey) -> Option<Option<GenomeKey>>,
    {
        let model = self.startup.model.as_ref()?;
        let replacement = remap(model)?;
        let view = match replacement {
            Some(model) => StartupView {
                model: Some(model),
                overlay: self.startup.overlay.clone(),
            },
            None => StartupView::default(),
        };
        Some(self.set_startup_view(view))
    }

    pub fn tree_path_undo(&mut self, change: &TreePathChange) {
        self.replay_path(&change.new, &change.orig);
    }

    pub fn tree_path_redo(&mut self, change: &TreePathChange) {
        self.replay_path(&change.orig, &change.new);
    }

    fn replay_path(&mut self, gone: &Option<UserTreePath>, back: &Option<UserTreePath>) {
        if let Some(gone) = gone {
            self.paths.remove(&gone.id);
        }
        if let Some(back) = back {
            self.paths.insert(back.id.clone(), back.clone());
        }
    }

    pub fn startup_undo(&mut self, change: &StartupViewChange) {
        self.startup = change.orig.clone();
    }

    pub fn startup_redo(&mut self, change: &StartupViewChange) {
        self.startup = change.new.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_drops_and_renames_stops() {
        let mut nav = Navigation::default();
        nav.add_path(UserTreePath {
            id: "p1".to_string(),
            name: "Tour".to_string(),
            stops: vec![
                PathStop::model(GenomeKey::Instance("a".to_string())),
                PathStop::model(GenomeKey::Instance("b".to_string())),
            ],
        })
        .unwrap();
        let changes = nav.remap_stops(|key| match key {
            GenomeKey::Instance(id) if id == "a" => Some(None),
            GenomeKey::Instance(id) if id == "b" => Some(Some(GenomeKey::Instance("c".to_string()))),
            _ => None,
        });
        assert_eq!(changes.len(), 1);
        let stops = &nav.path("p1").unwrap().stops;
        assert_eq!(stops, &vec![PathStop::model(GenomeKey::Instance("c".to_string()))]);
        nav.tree_path_undo(&changes[0]);
        assert_eq!(nav.path("p1").unwrap().stops.len(), 2);
    }
}
