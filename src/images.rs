use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GenomeError;

/// Reference count change of one stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageChange {
    pub image_key: String,
    pub orig_count: u32,
    pub new_count: u32,
}

/// Reference-counted image keys. Blobs themselves live elsewhere; an image
/// whose count drops to zero is forgotten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManager {
    usage: BTreeMap<String, u32>,
}

impl ImageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage_count(&self, key: &str) -> u32 {
        self.usage.get(key).copied().unwrap_or(0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.usage.keys().map(String::as_str)
    }

    fn set_count(&mut self, key: &str, count: u32) {
        if count == 0 {
            self.usage.remove(key);
        } else {
            self.usage.insert(key.to_string(), count);
        }
    }

    pub fn register_image_usage(&mut self, key: &str) -> ImageChange {
        let orig_count = self.usage_count(key);
        self.set_count(key, orig_count + 1);
        debug!(image = key, count = orig_count + 1, "image usage registered");
        ImageChange {
            image_key: key.to_string(),
            orig_count,
            new_count: orig_count + 1,
        }
    }

    pub fn drop_image_usage(&mut self, key: &str) -> Result<ImageChange, GenomeError> {
        let orig_count = self.usage_count(key);
        if orig_count == 0 {
            return Err(GenomeError::missing("image manager", "image", key));
        }
        self.set_count(key, orig_count - 1);
        debug!(image = key, count = orig_count - 1, "image usage dropped");
        Ok(ImageChange {
            image_key: key.to_string(),
            orig_count,
            new_count: orig_count - 1,
        })
    }

    pub fn change_undo(&mut self, change: &ImageChange) {
        self.set_count(&change.image_key, change.orig_count);
    }

    pub fn change_redo(&mut self, change: &ImageChange) {
        self.set_count(&change.image_key, change.new_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_go_to_zero_and_back() {
        let mut images = ImageManager::new();
        images.register_image_usage("img1");
        let change = images.drop_image_usage("img1").unwrap();
        assert_eq!(images.usage_count("img1"), 0);
        images.change_undo(&change);
        assert_eq!(images.usage_count("img1"), 1);
        assert!(images.drop_image_usage("img2").is_err());
    }
}
