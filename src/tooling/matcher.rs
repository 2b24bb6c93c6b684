//! Declarative matchers over types, methods and class loaders.

use serde::{Deserialize, Serialize};

use crate::descriptor;
use crate::ir::{MethodDescription, TypeDescription};
use crate::opcodes;

/// Matches a type by its own description. Names are binary names (`java.lang.String`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TypeMatcher {
    Any,
    Named { name: String },
    NamedOneOf { names: Vec<String> },
    NameStartsWith { prefix: String },
    NameEndsWith { suffix: String },
    IsInterface,
    Not { matcher: Box<TypeMatcher> },
    AllOf { matchers: Vec<TypeMatcher> },
    AnyOf { matchers: Vec<TypeMatcher> },
}

impl TypeMatcher {
    pub fn named(name: &str) -> Self {
        TypeMatcher::Named {
            name: name.to_string(),
        }
    }

    pub fn matches(&self, description: &TypeDescription) -> bool {
        self.matches_name(&description.binary_name(), description.is_interface())
    }

    /// Matches a class known only by name, such as a class loader.
    pub fn matches_name(&self, name: &str, is_interface: bool) -> bool {
        match self {
            TypeMatcher::Any => true,
            TypeMatcher::Named { name: expected } => name == expected,
            TypeMatcher::NamedOneOf { names } => names.iter().any(|expected| expected == name),
            TypeMatcher::NameStartsWith { prefix } => name.starts_with(prefix.as_str()),
            TypeMatcher::NameEndsWith { suffix } => name.ends_with(suffix.as_str()),
            TypeMatcher::IsInterface => is_interface,
            TypeMatcher::Not { matcher } => !matcher.matches_name(name, is_interface),
            TypeMatcher::AllOf { matchers } => matchers
                .iter()
                .all(|matcher| matcher.matches_name(name, is_interface)),
            TypeMatcher::AnyOf { matchers } => matchers
                .iter()
                .any(|matcher| matcher.matches_name(name, is_interface)),
        }
    }
}

/// Matches a type through its super classes and interfaces, the type itself excluded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HierarchyMatcher {
    ExtendsClass { matcher: TypeMatcher },
    ImplementsInterface { matcher: TypeMatcher },
    HasSuperType { matcher: TypeMatcher },
}

impl HierarchyMatcher {
    pub fn matches_super_type(&self, super_type: &TypeDescription) -> bool {
        match self {
            HierarchyMatcher::ExtendsClass { matcher } => {
                !super_type.is_interface() && matcher.matches(super_type)
            }
            HierarchyMatcher::ImplementsInterface { matcher } => {
                super_type.is_interface() && matcher.matches(super_type)
            }
            HierarchyMatcher::HasSuperType { matcher } => matcher.matches(super_type),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MethodMatcher {
    Any,
    Named { name: String },
    NamedOneOf { names: Vec<String> },
    IsConstructor,
    IsStatic,
    IsPublic,
    IsSynthetic,
    TakesArguments { count: usize },
    /// Exact JVM descriptor, `(Ljava/lang/String;)V`.
    HasDescriptor { descriptor: String },
    /// Binary name of the return type, `void` for none.
    Returns { type_name: String },
    Not { matcher: Box<MethodMatcher> },
    AllOf { matchers: Vec<MethodMatcher> },
    AnyOf { matchers: Vec<MethodMatcher> },
}

impl MethodMatcher {
    pub fn named(name: &str) -> Self {
        MethodMatcher::Named {
            name: name.to_string(),
        }
    }

    pub fn matches(&self, method: &MethodDescription) -> bool {
        match self {
            MethodMatcher::Any => true,
            MethodMatcher::Named { name } => method.name == *name,
            MethodMatcher::NamedOneOf { names } => names.iter().any(|name| method.name == *name),
            MethodMatcher::IsConstructor => method.is_constructor(),
            MethodMatcher::IsStatic => method.is_static(),
            MethodMatcher::IsPublic => method.access & opcodes::ACC_PUBLIC != 0,
            MethodMatcher::IsSynthetic => method.is_synthetic(),
            MethodMatcher::TakesArguments { count } => {
                descriptor::argument_types(&method.descriptor)
                    .is_ok_and(|arguments| arguments.len() == *count)
            }
            MethodMatcher::HasDescriptor { descriptor } => method.descriptor == *descriptor,
            MethodMatcher::Returns { type_name } => {
                descriptor::return_type(&method.descriptor).is_ok_and(|ret| {
                    descriptor::java_type_to_descriptor(type_name)
                        .is_ok_and(|expected| ret.descriptor() == expected)
                })
            }
            MethodMatcher::Not { matcher } => !matcher.matches(method),
            MethodMatcher::AllOf { matchers } => matchers.iter().all(|m| m.matches(method)),
            MethodMatcher::AnyOf { matchers } => matchers.iter().any(|m| m.matches(method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_matchers_use_binary_names() {
        let mut description = TypeDescription::new("com/example/http/Client");
        let matcher = TypeMatcher::AllOf {
            matchers: vec![
                TypeMatcher::NameStartsWith {
                    prefix: "com.example.".to_string(),
                },
                TypeMatcher::Not {
                    matcher: Box::new(TypeMatcher::IsInterface),
                },
            ],
        };
        assert!(matcher.matches(&description));

        description.access |= opcodes::ACC_INTERFACE;
        assert!(!matcher.matches(&description));
        assert!(TypeMatcher::named("com.example.http.Client").matches(&description));
    }

    #[test]
    fn hierarchy_matchers_split_classes_and_interfaces() {
        let mut runnable = TypeDescription::new("java/lang/Runnable");
        runnable.access |= opcodes::ACC_INTERFACE;
        let implements = HierarchyMatcher::ImplementsInterface {
            matcher: TypeMatcher::named("java.lang.Runnable"),
        };
        let extends = HierarchyMatcher::ExtendsClass {
            matcher: TypeMatcher::named("java.lang.Runnable"),
        };
        assert!(implements.matches_super_type(&runnable));
        assert!(!extends.matches_super_type(&runnable));
    }

    #[test]
    fn method_matchers_read_descriptors() {
        let method = MethodDescription::new(
            opcodes::ACC_PUBLIC,
            "execute",
            "(Ljava/lang/String;I)Ljava/util/List;",
        );
        let matcher: MethodMatcher = serde_json::from_str(
            r#"{"kind": "allOf", "matchers": [
                {"kind": "named", "name": "execute"},
                {"kind": "takesArguments", "count": 2},
                {"kind": "returns", "typeName": "java.util.List"},
                {"kind": "isPublic"}
            ]}"#,
        )
        .expect("parse matcher");

        assert!(matcher.matches(&method));
        assert!(!MethodMatcher::IsStatic.matches(&method));
        assert!(MethodMatcher::Returns {
            type_name: "void".to_string()
        }
        .matches(&MethodDescription::new(0, "run", "()V")));
    }
}
