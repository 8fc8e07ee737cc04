use super::module::ExternalFuncInst;
use super::store::Store;
use super::value::Value;
use anyhow::Result;

/// Host module whose functions can be imported by a guest module.
pub trait Importer {
    /// Module name the guest imports from, e.g. `wasi_snapshot_preview1`.
    fn name(&self) -> &str;

    /// Whether `field` can be resolved. Checked once at instantiation.
    fn provides(&self, _field: &str) -> bool {
        true
    }

    fn invoke(
        &self,
        store: &mut Store,
        func: &ExternalFuncInst,
        args: Vec<Value>,
    ) -> Result<Option<Value>>;

    /// Called once when the embedding host shuts the runtime down.
    fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

pub type Imports = Vec<Box<dyn Importer>>;
