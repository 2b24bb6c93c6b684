use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bytecode::Handle;
use crate::csi::advice::{AdviceMethod, AdviceType, CallSiteAdvice, DeclaredAdvice};
use crate::csi::{Pointcut, PointcutError};
use crate::descriptor::binary_to_internal;

/// Declarative form of a call site, as read from JSON.
///
/// ```json
/// {
///   "type": "after",
///   "pointcut": "java.lang.String java.lang.String.concat(java.lang.String)",
///   "advice": "com.example.StringAdvices.afterConcat",
///   "helpers": ["com.example.StringAdvices"]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSiteDeclaration {
    #[serde(rename = "type")]
    pub advice_type: AdviceType,
    pub pointcut: String,
    /// `<class>.<method>` of the static advice method.
    pub advice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice_descriptor: Option<String>,
    /// The pointcut names the bootstrap method of `invokedynamic` sites.
    #[serde(default)]
    pub invoke_dynamic: bool,
    #[serde(default)]
    pub all_arguments: bool,
    #[serde(default)]
    pub bootstrap_arguments: bool,
    #[serde(default)]
    pub helpers: Vec<String>,
}

impl CallSiteDeclaration {
    pub fn into_call_site(self) -> Result<CallSite, PointcutError> {
        let pointcut = Pointcut::parse(&self.pointcut)?;
        if pointcut.is_constructor() && self.advice_type == AdviceType::Around {
            return Err(PointcutError::Unsupported(format!(
                "around advice on constructor {pointcut}"
            )));
        }
        if self.bootstrap_arguments && !self.invoke_dynamic {
            return Err(PointcutError::Unsupported(format!(
                "bootstrap arguments requested for non-invokedynamic call site {pointcut}"
            )));
        }
        let (owner, name) = self
            .advice
            .rsplit_once('.')
            .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
            .ok_or_else(|| PointcutError::Malformed(self.advice.clone()))?;
        if let Some(descriptor) = &self.advice_descriptor {
            // Validates the descriptor shape.
            Pointcut::new(owner, name, descriptor)?;
        }
        let advice = Arc::new(DeclaredAdvice {
            advice_type: self.advice_type,
            method: AdviceMethod {
                owner: binary_to_internal(owner),
                name: name.to_string(),
                descriptor: self.advice_descriptor,
            },
            all_arguments: self.all_arguments,
            bootstrap_arguments: self.bootstrap_arguments,
        });
        let advice = if self.invoke_dynamic {
            CallSiteAdvice::InvokeDynamic(advice)
        } else {
            CallSiteAdvice::Invoke(advice)
        };
        Ok(CallSite {
            advice_type: self.advice_type,
            pointcut,
            advice,
            helpers: self
                .helpers
                .iter()
                .map(|helper| binary_to_internal(helper))
                .collect(),
        })
    }
}

/// A pointcut bound to the advice rewriting its call sites.
#[derive(Clone, Debug)]
pub struct CallSite {
    pub advice_type: AdviceType,
    pub pointcut: Pointcut,
    pub advice: CallSiteAdvice,
    /// Internal names of the classes the advice needs at runtime.
    pub helpers: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum AdviceKind {
    Invoke,
    InvokeDynamic,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct AdviceKey {
    kind: AdviceKind,
    owner: String,
    name: String,
    descriptor: String,
}

impl AdviceKey {
    fn of(call_site: &CallSite) -> Self {
        let kind = match call_site.advice {
            CallSiteAdvice::Invoke(_) => AdviceKind::Invoke,
            CallSiteAdvice::InvokeDynamic(_) => AdviceKind::InvokeDynamic,
        };
        Self {
            kind,
            owner: call_site.pointcut.owner.clone(),
            name: call_site.pointcut.method.clone(),
            descriptor: call_site.pointcut.descriptor.clone(),
        }
    }
}

/// Registry of call sites: one advice per kind and pointcut, plus the helpers they need.
#[derive(Clone, Debug, Default)]
pub struct CallSites {
    call_sites: Vec<CallSite>,
    index: HashMap<AdviceKey, usize>,
    helpers: Vec<String>,
}

impl CallSites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_declarations(
        declarations: impl IntoIterator<Item = CallSiteDeclaration>,
    ) -> Result<Self, PointcutError> {
        let mut call_sites = Self::new();
        for declaration in declarations {
            call_sites.register(declaration.into_call_site()?)?;
        }
        Ok(call_sites)
    }

    /// Reads a JSON array of [`CallSiteDeclaration`]s.
    pub fn from_json(json: &str) -> Result<Self> {
        let declarations: Vec<CallSiteDeclaration> =
            serde_json::from_str(json).context("failed to parse call site declarations")?;
        Self::from_declarations(declarations).context("invalid call site declaration")
    }

    pub fn register(&mut self, call_site: CallSite) -> Result<(), PointcutError> {
        let key = AdviceKey::of(&call_site);
        if self.index.contains_key(&key) {
            return Err(PointcutError::Duplicate(call_site.pointcut.to_string()));
        }
        for helper in &call_site.helpers {
            if !self.helpers.contains(helper) {
                self.helpers.push(helper.clone());
            }
        }
        debug!(
            pointcut = %call_site.pointcut,
            advice_type = ?call_site.advice_type,
            "registered call site"
        );
        self.index.insert(key, self.call_sites.len());
        self.call_sites.push(call_site);
        Ok(())
    }

    /// Helper classes in declaration order, without duplicates.
    pub fn helpers(&self) -> &[String] {
        &self.helpers
    }

    pub fn len(&self) -> usize {
        self.call_sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.call_sites.is_empty()
    }

    pub fn advices(&self) -> Advices {
        Advices {
            entries: Arc::new(
                self.index
                    .iter()
                    .map(|(key, index)| (key.clone(), self.call_sites[*index].clone()))
                    .collect(),
            ),
        }
    }
}

/// Lookup view over registered call sites, cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct Advices {
    entries: Arc<HashMap<AdviceKey, CallSite>>,
}

impl Advices {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn find_advice(&self, owner: &str, name: &str, descriptor: &str) -> Option<&CallSite> {
        self.find(AdviceKind::Invoke, owner, name, descriptor)
    }

    pub fn find_invoke_dynamic_advice(&self, bootstrap: &Handle) -> Option<&CallSite> {
        self.find(
            AdviceKind::InvokeDynamic,
            &bootstrap.owner,
            &bootstrap.name,
            &bootstrap.descriptor,
        )
    }

    fn find(
        &self,
        kind: AdviceKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<&CallSite> {
        // TODO: borrow-based lookup once the key type stores `Cow<str>`.
        self.entries.get(&AdviceKey {
            kind,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    /// Keeps the advices whose pointcut is referenced from the class constant pool. Both
    /// call targets and bootstrap methods appear there as method references. When the class
    /// cannot be introspected every advice is kept.
    pub fn find_advices(&self, class_bytes: &[u8]) -> Advices {
        if self.is_empty() {
            return self.clone();
        }
        match referenced_methods(class_bytes) {
            Ok(references) => Advices {
                entries: Arc::new(
                    self.entries
                        .iter()
                        .filter(|(key, _)| {
                            references.contains(&(
                                key.owner.as_str(),
                                key.name.as_str(),
                                key.descriptor.as_str(),
                            ))
                        })
                        .map(|(key, call_site)| (key.clone(), call_site.clone()))
                        .collect(),
                ),
            },
            Err(error) => {
                debug!(error = %error, "constant pool introspection failed, keeping all advices");
                self.clone()
            }
        }
    }

    /// Union of the helpers of the advices in this view, sorted.
    pub fn helpers(&self) -> Vec<String> {
        let mut helpers: Vec<String> = self
            .entries
            .values()
            .flat_map(|call_site| call_site.helpers.iter().cloned())
            .collect();
        helpers.sort();
        helpers.dedup();
        helpers
    }
}

/// Method references of a class, collected while the parsed class is alive.
struct References {
    methods: Vec<(String, String, String)>,
}

impl References {
    fn contains(&self, target: &(&str, &str, &str)) -> bool {
        self.methods.iter().any(|(owner, name, descriptor)| {
            owner == target.0 && name == target.1 && descriptor == target.2
        })
    }
}

fn referenced_methods(class_bytes: &[u8]) -> Result<References> {
    let class_file = class_file::parse(class_bytes).context("failed to parse class file")?;
    let constant_pool = class_file.constant_pool();
    let mut methods = Vec::new();
    for entry in constant_pool {
        let (class_index, name_and_type_index) = match entry {
            ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            _ => continue,
        };
        let owner = resolve_class_name(constant_pool, class_index)?;
        let (name_index, descriptor_index) = match constant_pool.get(name_and_type_index as usize) {
            Some(ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            }) => (*name_index, *descriptor_index),
            _ => anyhow::bail!("unexpected name and type entry"),
        };
        methods.push((
            owner,
            resolve_utf8(constant_pool, name_index)?,
            resolve_utf8(constant_pool, descriptor_index)?,
        ));
    }
    Ok(References { methods })
}

fn resolve_class_name(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    match constant_pool.get(index as usize) {
        Some(ConstantPool::Class { name_index }) => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    match constant_pool.get(index as usize) {
        Some(ConstantPool::Utf8 { value }) => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bytecode::writer::tests::class_with_method;
    use crate::ir::MethodDescription;
    use crate::opcodes;

    pub(crate) fn concat_declaration() -> CallSiteDeclaration {
        CallSiteDeclaration {
            advice_type: AdviceType::After,
            pointcut: "java.lang.String java.lang.String.concat(java.lang.String)".to_string(),
            advice: "com.example.StringAdvices.afterConcat".to_string(),
            advice_descriptor: None,
            invoke_dynamic: false,
            all_arguments: false,
            bootstrap_arguments: false,
            helpers: vec!["com.example.StringAdvices".to_string()],
        }
    }

    #[test]
    fn parses_declarations_from_json() {
        let call_sites = CallSites::from_json(
            r#"[
                {
                    "type": "before",
                    "pointcut": "void java.lang.Runtime.exec(java.lang.String)",
                    "advice": "com.example.Cmdi.beforeExec",
                    "helpers": ["com.example.Cmdi", "com.example.Shared"]
                },
                {
                    "type": "after",
                    "pointcut": "java.lang.String java.lang.String.trim()",
                    "advice": "com.example.Strings.afterTrim",
                    "helpers": ["com.example.Shared"]
                }
            ]"#,
        )
        .expect("parse call sites");

        assert_eq!(call_sites.len(), 2);
        assert_eq!(
            call_sites.helpers(),
            ["com/example/Cmdi", "com/example/Shared"]
        );
        let advices = call_sites.advices();
        let trim = advices
            .find_advice("java/lang/String", "trim", "()Ljava/lang/String;")
            .expect("trim advice");
        assert_eq!(trim.advice_type, AdviceType::After);
    }

    #[test]
    fn rejects_duplicate_pointcut() {
        let result = CallSites::from_declarations([concat_declaration(), concat_declaration()]);
        assert!(matches!(result, Err(PointcutError::Duplicate(_))));
    }

    #[test]
    fn rejects_around_constructor() {
        let mut declaration = concat_declaration();
        declaration.advice_type = AdviceType::Around;
        declaration.pointcut = "void java.io.File.<init>(java.lang.String)".to_string();

        assert!(matches!(
            declaration.into_call_site(),
            Err(PointcutError::Unsupported(_))
        ));
    }

    #[test]
    fn find_advices_keeps_only_referenced_pointcuts() {
        let mut trim = concat_declaration();
        trim.pointcut = "java.lang.String java.lang.String.trim()".to_string();
        trim.advice = "com.example.StringAdvices.afterTrim".to_string();
        let call_sites =
            CallSites::from_declarations([concat_declaration(), trim]).expect("call sites");
        let bytes = class_with_method(
            "com/example/Greeter",
            MethodDescription::new(
                opcodes::ACC_STATIC,
                "greet",
                "(Ljava/lang/String;)Ljava/lang/String;",
            ),
            |visitor| {
                visitor.visit_var_insn(opcodes::ALOAD, 0);
                visitor.visit_method_insn(
                    opcodes::INVOKEVIRTUAL,
                    "java/lang/String",
                    "trim",
                    "()Ljava/lang/String;",
                    false,
                );
                visitor.visit_insn(opcodes::ARETURN);
            },
        );

        let found = call_sites.advices().find_advices(&bytes);

        assert_eq!(found.len(), 1);
        assert!(found
            .find_advice("java/lang/String", "trim", "()Ljava/lang/String;")
            .is_some());
        assert!(call_sites.advices().find_advices(b"not a class").len() == 2);
    }
}
