use thiserror::Error;

/// Failure to parse a JVM or Java-source type descriptor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid descriptor: {0}")]
pub struct DescriptorError(pub String);

/// A JVM value type, as found in field and method descriptors.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum JvmType {
    Void,
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Float,
    Long,
    Double,
    /// Reference type, holding its internal name (`java/lang/String`).
    Object(String),
    /// Array type, holding its full descriptor (`[Ljava/lang/String;`).
    Array(String),
}

impl JvmType {
    pub fn object(internal_name: &str) -> Self {
        JvmType::Object(internal_name.to_string())
    }

    /// Number of operand stack (and local variable) slots used by a value of this type.
    pub fn size(&self) -> usize {
        match self {
            JvmType::Void => 0,
            JvmType::Long | JvmType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, JvmType::Object(_) | JvmType::Array(_))
    }

    pub fn descriptor(&self) -> String {
        match self {
            JvmType::Void => "V".to_string(),
            JvmType::Boolean => "Z".to_string(),
            JvmType::Char => "C".to_string(),
            JvmType::Byte => "B".to_string(),
            JvmType::Short => "S".to_string(),
            JvmType::Int => "I".to_string(),
            JvmType::Float => "F".to_string(),
            JvmType::Long => "J".to_string(),
            JvmType::Double => "D".to_string(),
            JvmType::Object(name) => format!("L{name};"),
            JvmType::Array(descriptor) => descriptor.clone(),
        }
    }

    /// Name usable as a `CONSTANT_Class` operand (`CHECKCAST`, `ANEWARRAY`, `LDC`).
    pub fn internal_name(&self) -> String {
        match self {
            JvmType::Object(name) => name.clone(),
            other => other.descriptor(),
        }
    }

    pub fn from_descriptor(descriptor: &str) -> Result<Self, DescriptorError> {
        let (ty, rest) = parse_field_type(descriptor)?;
        if !rest.is_empty() {
            return Err(DescriptorError(descriptor.to_string()));
        }
        Ok(ty)
    }

    /// Builds a type from a `CONSTANT_Class` name, which is either an internal name or an
    /// array descriptor.
    pub fn from_internal_name(name: &str) -> Self {
        if name.starts_with('[') {
            JvmType::Array(name.to_string())
        } else {
            JvmType::Object(name.to_string())
        }
    }
}

fn parse_field_type(descriptor: &str) -> Result<(JvmType, &str), DescriptorError> {
    let invalid = || DescriptorError(descriptor.to_string());
    let mut chars = descriptor.chars();
    let first = chars.next().ok_or_else(invalid)?;
    let rest = chars.as_str();
    let ty = match first {
        'V' => JvmType::Void,
        'Z' => JvmType::Boolean,
        'C' => JvmType::Char,
        'B' => JvmType::Byte,
        'S' => JvmType::Short,
        'I' => JvmType::Int,
        'F' => JvmType::Float,
        'J' => JvmType::Long,
        'D' => JvmType::Double,
        'L' => {
            let end = rest.find(';').ok_or_else(invalid)?;
            if end == 0 {
                return Err(invalid());
            }
            return Ok((JvmType::Object(rest[..end].to_string()), &rest[end + 1..]));
        }
        '[' => {
            let (component, tail) = parse_field_type(rest)?;
            if component == JvmType::Void {
                return Err(invalid());
            }
            let consumed = descriptor.len() - tail.len();
            return Ok((JvmType::Array(descriptor[..consumed].to_string()), tail));
        }
        _ => return Err(invalid()),
    };
    Ok((ty, rest))
}

/// Parses a method descriptor into its argument types and return type.
pub fn parse_method_descriptor(
    descriptor: &str,
) -> Result<(Vec<JvmType>, JvmType), DescriptorError> {
    let invalid = || DescriptorError(descriptor.to_string());
    let mut rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
    let mut arguments = Vec::new();
    loop {
        if let Some(tail) = rest.strip_prefix(')') {
            rest = tail;
            break;
        }
        let (ty, tail) = parse_field_type(rest)?;
        if ty == JvmType::Void {
            return Err(invalid());
        }
        arguments.push(ty);
        rest = tail;
    }
    let (return_type, tail) = parse_field_type(rest)?;
    if !tail.is_empty() {
        return Err(invalid());
    }
    Ok((arguments, return_type))
}

pub fn argument_types(descriptor: &str) -> Result<Vec<JvmType>, DescriptorError> {
    parse_method_descriptor(descriptor).map(|(arguments, _)| arguments)
}

pub fn return_type(descriptor: &str) -> Result<JvmType, DescriptorError> {
    parse_method_descriptor(descriptor).map(|(_, ret)| ret)
}

/// Total slot size of the arguments of a method descriptor, excluding `this`.
pub fn arguments_size(descriptor: &str) -> Result<usize, DescriptorError> {
    Ok(argument_types(descriptor)?.iter().map(JvmType::size).sum())
}

/// Builds a method descriptor from its parts.
pub fn method_descriptor(arguments: &[JvmType], return_type: &JvmType) -> String {
    let mut out = String::from("(");
    for argument in arguments {
        out.push_str(&argument.descriptor());
    }
    out.push(')');
    out.push_str(&return_type.descriptor());
    out
}

/// Converts a Java source type (`int`, `java.lang.String[]`) to a JVM descriptor.
pub fn java_type_to_descriptor(java_type: &str) -> Result<String, DescriptorError> {
    let trimmed = java_type.trim();
    let mut base = trimmed;
    let mut dimensions = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped.trim_end();
        dimensions += 1;
    }
    if base.is_empty() || base.contains(char::is_whitespace) {
        return Err(DescriptorError(java_type.to_string()));
    }
    let element = match base {
        "void" if dimensions == 0 => "V".to_string(),
        "void" => return Err(DescriptorError(java_type.to_string())),
        "boolean" => "Z".to_string(),
        "char" => "C".to_string(),
        "byte" => "B".to_string(),
        "short" => "S".to_string(),
        "int" => "I".to_string(),
        "float" => "F".to_string(),
        "long" => "J".to_string(),
        "double" => "D".to_string(),
        other => format!("L{};", binary_to_internal(other)),
    };
    Ok(format!("{}{}", "[".repeat(dimensions), element))
}

/// `java.lang.String` -> `java/lang/String`.
pub fn binary_to_internal(name: &str) -> String {
    name.replace('.', "/")
}

/// `java/lang/String` -> `java.lang.String`.
pub fn internal_to_binary(name: &str) -> String {
    name.replace('/', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_descriptor_with_wide_and_array_types() {
        let (arguments, ret) =
            parse_method_descriptor("(IJ[Ljava/lang/String;D)Ljava/lang/Object;")
                .expect("parse descriptor");

        assert_eq!(
            arguments,
            vec![
                JvmType::Int,
                JvmType::Long,
                JvmType::Array("[Ljava/lang/String;".to_string()),
                JvmType::Double,
            ]
        );
        assert_eq!(ret, JvmType::object("java/lang/Object"));
        assert_eq!(
            arguments_size("(IJ[Ljava/lang/String;D)V").expect("size"),
            6
        );
    }

    #[test]
    fn rejects_malformed_descriptors() {
        assert!(parse_method_descriptor("(I").is_err());
        assert!(parse_method_descriptor("(V)V").is_err());
        assert!(parse_method_descriptor("(Ljava/lang/String)V").is_err());
        assert!(JvmType::from_descriptor("IJ").is_err());
    }

    #[test]
    fn multibyte_characters_are_rejected_without_panicking() {
        assert!(JvmType::from_descriptor("ǉ").is_err());
        assert!(parse_method_descriptor("(ǉ)V").is_err());
        assert!(parse_method_descriptor("()ǉ").is_err());
        assert_eq!(
            JvmType::from_descriptor("Lcom/example/Ĳssel;").expect("object"),
            JvmType::object("com/example/Ĳssel")
        );
    }

    #[test]
    fn converts_java_source_types() {
        assert_eq!(java_type_to_descriptor("int").expect("int"), "I");
        assert_eq!(
            java_type_to_descriptor("java.lang.String[][]").expect("array"),
            "[[Ljava/lang/String;"
        );
        assert_eq!(java_type_to_descriptor("void").expect("void"), "V");
        assert!(java_type_to_descriptor("void[]").is_err());
        assert!(java_type_to_descriptor("").is_err());
    }
}
