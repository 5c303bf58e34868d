//! Module, type and method model handed to the transforms by the loading layer.
//!
//! Methods are addressed by [`MethodId`] (type index, method index) rather than by name, so
//! renaming never invalidates a call reference. External callables live in the module's import
//! table and are addressed by [`ExternalId`].

use crate::body::MethodBody;
use crate::externals::WellKnown;
use serde::{Deserialize, Serialize};
use shade_utils::errors::ModelError;
use std::fmt;

/// Value types used in signatures and local-variable tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSig {
    Void,
    Bool,
    I4,
    I8,
    R4,
    R8,
    String,
    Object,
    Array(Box<TypeSig>),
    Class(String),
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Bool => f.write_str("bool"),
            Self::I4 => f.write_str("int32"),
            Self::I8 => f.write_str("int64"),
            Self::R4 => f.write_str("float32"),
            Self::R8 => f.write_str("float64"),
            Self::String => f.write_str("string"),
            Self::Object => f.write_str("object"),
            Self::Array(elem) => write!(f, "{elem}[]"),
            Self::Class(name) => f.write_str(name),
        }
    }
}

/// Calling convention and shape of a callable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSig {
    /// The callee takes an implicit receiver.
    pub has_this: bool,
    /// Declared parameters, receiver excluded.
    pub params: Vec<TypeSig>,
    /// Return type.
    pub ret: TypeSig,
}

impl MethodSig {
    /// Signature of a static method.
    pub const fn static_fn(params: Vec<TypeSig>, ret: TypeSig) -> Self {
        Self {
            has_this: false,
            params,
            ret,
        }
    }

    /// Signature of an instance method.
    pub const fn instance_fn(params: Vec<TypeSig>, ret: TypeSig) -> Self {
        Self {
            has_this: true,
            params,
            ret,
        }
    }

    /// Whether the return type is void.
    pub fn returns_void(&self) -> bool {
        self.ret == TypeSig::Void
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        let instance = if self.has_this { "instance " } else { "" };
        write!(f, "{instance}{} ({})", self.ret, params.join(", "))
    }
}

/// Handle of a method defined in the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId {
    pub type_index: usize,
    pub method_index: usize,
}

impl MethodId {
    pub const fn new(type_index: usize, method_index: usize) -> Self {
        Self {
            type_index,
            method_index,
        }
    }
}

/// Index into the module's import table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId(pub usize);

/// What a method reference resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodTarget {
    Internal(MethodId),
    External(ExternalId),
}

/// A callable reference as carried by call-family operands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub target: MethodTarget,
    pub sig: MethodSig,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            MethodTarget::Internal(id) => {
                write!(f, "{} method({}:{})", self.sig, id.type_index, id.method_index)
            }
            MethodTarget::External(ExternalId(idx)) => write!(f, "{} import({idx})", self.sig),
        }
    }
}

/// A field reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub declaring_type: String,
    pub name: String,
    pub ty: TypeSig,
}

/// A type reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
}

/// A method imported from outside the module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalMethod {
    /// Declaring type, fully qualified (e.g. `System.Convert`).
    pub declaring_type: String,
    /// Method name.
    pub name: String,
    /// Signature.
    pub sig: MethodSig,
}

/// Method flags whose names are externally observable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodFlags {
    pub constructor: bool,
    pub getter: bool,
    pub setter: bool,
    pub entry_point: bool,
}

impl MethodFlags {
    /// Getter or setter of a property.
    pub const fn is_property_accessor(&self) -> bool {
        self.getter || self.setter
    }
}

/// A method definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub sig: MethodSig,
    #[serde(default)]
    pub flags: MethodFlags,
    /// `None` for abstract, extern and runtime-implemented methods.
    #[serde(default)]
    pub body: Option<MethodBody>,
}

impl Method {
    /// Creates a method with an empty body.
    pub fn new(name: impl Into<String>, sig: MethodSig) -> Self {
        Self {
            name: name.into(),
            sig,
            flags: MethodFlags::default(),
            body: Some(MethodBody::default()),
        }
    }

    /// Whether the method has instructions to transform.
    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.instructions.is_empty())
    }

    /// Whether the return type is void.
    pub fn returns_void(&self) -> bool {
        self.sig.returns_void()
    }
}

/// A type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub methods: Vec<Method>,
}

impl TypeDef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// `Namespace.Name`, or just `Name` without a namespace.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// A loaded module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    /// Import table for external callables.
    #[serde(default)]
    pub imports: Vec<ExternalMethod>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
            imports: Vec::new(),
        }
    }

    /// Looks up a method by handle.
    pub fn method(&self, id: MethodId) -> Result<&Method, ModelError> {
        self.types
            .get(id.type_index)
            .and_then(|t| t.methods.get(id.method_index))
            .ok_or(ModelError::MissingMethod {
                type_index: id.type_index,
                method_index: id.method_index,
            })
    }

    /// Looks up a method by handle for mutation.
    pub fn method_mut(&mut self, id: MethodId) -> Result<&mut Method, ModelError> {
        self.types
            .get_mut(id.type_index)
            .and_then(|t| t.methods.get_mut(id.method_index))
            .ok_or(ModelError::MissingMethod {
                type_index: id.type_index,
                method_index: id.method_index,
            })
    }

    /// Iterates every method with its handle.
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &Method)> + '_ {
        self.types.iter().enumerate().flat_map(|(ti, ty)| {
            ty.methods
                .iter()
                .enumerate()
                .map(move |(mi, m)| (MethodId::new(ti, mi), m))
        })
    }

    /// Finds the first method named `name` in any type.
    pub fn find_method(&self, name: &str) -> Option<MethodId> {
        self.methods()
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| id)
    }

    /// Finds a method by `Type::Method`, where `Type` may be the simple or full type name.
    pub fn find_qualified(&self, qualified: &str) -> Option<MethodId> {
        let (type_name, method_name) = qualified.rsplit_once("::")?;
        self.methods()
            .find(|(id, m)| {
                let ty = &self.types[id.type_index];
                m.name == method_name && (ty.name == type_name || ty.full_name() == type_name)
            })
            .map(|(id, _)| id)
    }

    /// The method flagged as the entry point, if any.
    pub fn entry_point(&self) -> Option<MethodId> {
        self.methods()
            .find(|(_, m)| m.flags.entry_point)
            .map(|(id, _)| id)
    }

    /// `Type::Method` display name of a method.
    pub fn qualified_name(&self, id: MethodId) -> String {
        match self.method(id) {
            Ok(method) => format!(
                "{}::{}",
                self.types[id.type_index].full_name(),
                method.name
            ),
            Err(_) => format!("<missing {}:{}>", id.type_index, id.method_index),
        }
    }

    /// Appends a method to the type at `type_index`, returning its handle.
    pub fn add_method(&mut self, type_index: usize, method: Method) -> Result<MethodId, ModelError> {
        let ty = self.types.get_mut(type_index).ok_or(ModelError::NoTypes)?;
        ty.methods.push(method);
        Ok(MethodId::new(type_index, ty.methods.len() - 1))
    }

    /// Resolves a well-known external callable into the import table.
    ///
    /// Repeated imports of the same callable return the same entry.
    pub fn import(&mut self, known: WellKnown) -> MethodRef {
        let external = known.descriptor();
        let sig = external.sig.clone();
        let index = match self.imports.iter().position(|e| *e == external) {
            Some(index) => index,
            None => {
                self.imports.push(external);
                self.imports.len() - 1
            }
        };
        MethodRef {
            target: MethodTarget::External(ExternalId(index)),
            sig,
        }
    }

    /// Looks up an import entry.
    pub fn external(&self, id: ExternalId) -> Option<&ExternalMethod> {
        self.imports.get(id.0)
    }
}
