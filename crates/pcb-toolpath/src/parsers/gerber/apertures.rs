use std::collections::HashMap;

use super::commands::ApertureTemplate;

/// Aperture table built from %AD commands.
#[derive(Debug, Default)]
pub struct ApertureTable {
    apertures: HashMap<u32, ApertureTemplate>,
}

impl ApertureTable {
    /// Define or redefine an aperture. Returns `true` when the code was
    /// already defined.
    pub fn define(&mut self, code: u32, template: ApertureTemplate) -> bool {
        self.apertures.insert(code, template).is_some()
    }

    pub fn get(&self, code: u32) -> Option<&ApertureTemplate> {
        self.apertures.get(&code)
    }
}
