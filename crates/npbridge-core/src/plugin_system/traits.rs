use std::fmt;

use crate::abi::types::NPPVariable;
use crate::plugin_system::error::PluginSystemError;

/// Identifier of an interface in the host's component model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub &'static str);

impl InterfaceId {
    /// The session interface; the only capability a legacy module offers.
    pub const PLUGIN_INSTANCE: InterfaceId = InterfaceId("npbridge.plugin-instance");
    /// The module-level plugin interface.
    pub const PLUGIN: InterfaceId = InterfaceId("npbridge.plugin");
    /// The generic factory interface.
    pub const FACTORY: InterfaceId = InterfaceId("npbridge.factory");
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Values the host may query from a module or one of its sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginVariable {
    NameString,
    DescriptionString,
    WindowBool,
    TransparentBool,
}

impl PluginVariable {
    pub fn to_raw(self) -> NPPVariable {
        match self {
            PluginVariable::NameString => NPPVariable::PLUGIN_NAME_STRING,
            PluginVariable::DescriptionString => NPPVariable::PLUGIN_DESCRIPTION_STRING,
            PluginVariable::WindowBool => NPPVariable::PLUGIN_WINDOW_BOOL,
            PluginVariable::TransparentBool => NPPVariable::PLUGIN_TRANSPARENT_BOOL,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, PluginVariable::NameString | PluginVariable::DescriptionString)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginValue {
    String(String),
    Bool(bool),
}

/// Module-level operations the host's component model expects of a plugin.
pub trait Plugin: Send + Sync {
    /// Name the host uses in diagnostics.
    fn name(&self) -> &str;

    /// Succeeds while the module is initialized and not shut down.
    fn initialize(&self) -> Result<(), PluginSystemError>;

    /// Shut the module down. Calling it again is a no-op.
    fn shutdown(&self) -> Result<(), PluginSystemError>;

    /// MIME types handled by the module, in the legacy
    /// `type:extensions:description;...` form.
    fn mime_description(&self) -> Result<String, PluginSystemError>;

    /// Query a module-level value (name and description strings).
    fn get_value(&self, variable: PluginVariable) -> Result<PluginValue, PluginSystemError>;
}

/// Generic creatable-object contract of the host's component model.
pub trait PluginFactory {
    type Instance;

    /// Create an object implementing `iid`.
    fn create_instance(&self, iid: &InterfaceId) -> Result<Self::Instance, PluginSystemError>;

    /// Advisory guard: while locked, `create_instance` is refused. There is no
    /// automatic unlock.
    fn lock_factory(&self, lock: bool);
}
