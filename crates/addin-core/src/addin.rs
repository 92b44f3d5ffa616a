//! Add-in packages: a name, a base location, runtimes, and extension blocks.
//!
//! ```json
//! { "name": "AddIn", "attributes": { "name": "core" }, "children": [
//!   { "name": "Runtime", "children": [
//!     { "name": "Import", "attributes": { "name": "ui", "path": "ui.module" }, "children": [
//!       { "name": "Doozer", "attributes": { "name": "MenuItem", "point": "doozers.menu" } }
//!     ] }
//!   ] },
//!   { "name": "Extension", "attributes": { "path": "/workbench/menu" }, "children": [
//!     { "name": "MenuItem", "attributes": { "id": "open", "label": "Open" } }
//!   ] }
//! ] }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::declaration::{DeclarationReader, ElementKind};
use crate::error::{AddInError, Result};
use crate::obs;
use crate::properties::Properties;
use crate::registry::LazyBinding;
use crate::runtime::Runtime;
use crate::sandbox::Sandbox;
use crate::tree::TreeJournal;

pub struct AddIn {
    name: String,
    base_location: String,
    properties: Properties,
    runtimes: BTreeMap<String, Arc<Runtime>>,
}

impl AddIn {
    pub fn new(name: impl Into<String>, base_location: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            properties: Properties::new().with("name", name.as_str()),
            name,
            base_location: base_location.into(),
            runtimes: BTreeMap::new(),
        }
    }

    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtimes.insert(runtime.name().to_string(), Arc::new(runtime));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory module locators are resolved against.
    pub fn base_location(&self) -> &str {
        &self.base_location
    }

    /// Attributes of the `<AddIn>` element.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn runtime(&self, name: &str) -> Option<Arc<Runtime>> {
        self.runtimes.get(name).cloned()
    }

    pub fn runtimes(&self) -> impl Iterator<Item = &Arc<Runtime>> {
        self.runtimes.values()
    }

    /// Reads an add-in document and registers the add-in with the sandbox.
    pub fn load(reader: &mut dyn DeclarationReader, base_location: &str, sandbox: &Sandbox) -> Result<Arc<Self>> {
        let add_in = Arc::new(Self::read(reader, base_location, sandbox)?);
        sandbox.register_add_in(Arc::clone(&add_in));
        obs::emit_add_in_loaded(add_in.name(), base_location, add_in.runtimes.len());
        Ok(add_in)
    }

    /// Reads an add-in document without registering it.
    ///
    /// Runtime doozer and evaluator declarations are registered as lazy
    /// bindings, and extension blocks are read into the sandbox tree. Both
    /// happen only if the whole document reads; on error the sandbox is left
    /// as it was.
    pub fn read(reader: &mut dyn DeclarationReader, base_location: &str, sandbox: &Sandbox) -> Result<Self> {
        let mut staged = Staged::default();
        match Self::read_staged(reader, base_location, sandbox, &mut staged) {
            Ok(add_in) => {
                staged.commit(sandbox);
                Ok(add_in)
            }
            Err(err) => {
                staged.tree.rollback();
                Err(err)
            }
        }
    }

    fn read_staged(
        reader: &mut dyn DeclarationReader,
        base_location: &str,
        sandbox: &Sandbox,
        staged: &mut Staged,
    ) -> Result<Self> {
        if !reader.move_to("AddIn") {
            return Err(AddInError::MissingAddInElement);
        }
        let properties = Properties::read(reader);
        let name = properties
            .non_empty("name")
            .map(str::to_string)
            .ok_or_else(|| AddInError::missing_attribute("AddIn", "name"))?;
        let mut add_in = Self {
            name,
            base_location: base_location.to_string(),
            properties,
            runtimes: BTreeMap::new(),
        };

        while reader.advance() {
            if reader.kind() != Some(ElementKind::Start) {
                continue;
            }
            match reader.name() {
                "Runtime" => add_in.read_runtimes(reader, &mut staged.bindings)?,
                "Extension" => {
                    let attributes = Properties::read(reader);
                    let path = attributes
                        .non_empty("path")
                        .or_else(|| attributes.non_empty("name"))
                        .ok_or_else(|| AddInError::missing_attribute("Extension", "path"))?;
                    let node = sandbox.root().locate_recorded(path, &mut staged.tree)?;
                    node.read_recorded(reader, "Extension", Some(&add_in.name), &mut staged.tree)?;
                }
                _ => {}
            }
        }
        Ok(add_in)
    }

    fn read_runtimes(&mut self, reader: &mut dyn DeclarationReader, bindings: &mut Vec<StagedBinding>) -> Result<()> {
        while reader.advance() {
            match reader.kind() {
                Some(ElementKind::End) if reader.name() == "Runtime" => return Ok(()),
                Some(ElementKind::Start) if matches!(reader.name(), "Import" | "Reference") => {
                    let element = reader.name().to_string();
                    let runtime = Arc::new(Runtime::read(reader, &self.name, &self.base_location)?);
                    self.runtimes.insert(runtime.name().to_string(), Arc::clone(&runtime));
                    read_bindings(reader, &element, &runtime, bindings)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Sandbox writes held back until the document has been read.
#[derive(Default)]
struct Staged {
    bindings: Vec<StagedBinding>,
    tree: TreeJournal,
}

enum StagedBinding {
    Doozer { names: String, binding: LazyBinding },
    Evaluator { names: String, binding: LazyBinding },
}

impl Staged {
    fn commit(self, sandbox: &Sandbox) {
        for staged in self.bindings {
            match staged {
                StagedBinding::Doozer { names, binding } => sandbox.doozers().set_lazy(&names, binding),
                StagedBinding::Evaluator { names, binding } => sandbox.evaluators().set_lazy(&names, binding),
            }
        }
    }
}

/// Collects `<Doozer>` / `<ConditionEvaluator>` declarations of one runtime.
fn read_bindings(
    reader: &mut dyn DeclarationReader,
    end_element: &str,
    runtime: &Arc<Runtime>,
    bindings: &mut Vec<StagedBinding>,
) -> Result<()> {
    while reader.advance() {
        match reader.kind() {
            Some(ElementKind::End) if reader.name() == end_element => return Ok(()),
            Some(ElementKind::Start) => {
                let element = reader.name().to_string();
                if element != "Doozer" && element != "ConditionEvaluator" {
                    continue;
                }
                let properties = Properties::read(reader);
                let name = properties
                    .non_empty("name")
                    .ok_or_else(|| AddInError::missing_attribute(&element, "name"))?;
                let point = properties
                    .non_empty("point")
                    .ok_or_else(|| AddInError::missing_attribute(&element, "point"))?;
                let names = name.to_string();
                let binding = LazyBinding::new(Arc::clone(runtime), point);
                if element == "Doozer" {
                    let handle_conditions = properties.parse_or("handleconditions", false);
                    bindings.push(StagedBinding::Doozer {
                        names,
                        binding: binding.handle_conditions(handle_conditions),
                    });
                } else {
                    bindings.push(StagedBinding::Evaluator { names, binding });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

impl fmt::Debug for AddIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddIn")
            .field("name", &self.name)
            .field("base_location", &self.base_location)
            .field("runtimes", &self.runtimes.keys().collect::<Vec<_>>())
            .finish()
    }
}
