use std::fmt;
use std::str::FromStr;

use jdescriptor::MethodDescriptor;

use crate::csi::PointcutError;
use crate::descriptor::{binary_to_internal, java_type_to_descriptor};

/// One method signature targeted by a call-site advice.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pointcut {
    /// Internal name of the declaring class.
    pub owner: String,
    pub method: String,
    pub descriptor: String,
}

impl Pointcut {
    pub fn new(owner: &str, method: &str, descriptor: &str) -> Result<Self, PointcutError> {
        MethodDescriptor::from_str(descriptor)
            .map_err(|_| PointcutError::InvalidDescriptor(descriptor.to_string()))?;
        Ok(Self {
            owner: owner.to_string(),
            method: method.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    /// Parses `<returnType> <owner>.<method>(<argType>,...)`, with Java source type names.
    pub fn parse(signature: &str) -> Result<Self, PointcutError> {
        let malformed = || PointcutError::Malformed(signature.to_string());
        let signature = signature.trim();
        let (return_type, target) = signature
            .split_once(char::is_whitespace)
            .ok_or_else(malformed)?;
        let target = target.trim();
        let (qualified_method, arguments) = target
            .strip_suffix(')')
            .and_then(|rest| rest.split_once('('))
            .ok_or_else(malformed)?;
        let (owner, method) = qualified_method
            .trim()
            .rsplit_once('.')
            .filter(|(owner, method)| !owner.is_empty() && !method.is_empty())
            .ok_or_else(malformed)?;

        let mut descriptor = String::from("(");
        for argument in arguments.split(',').map(str::trim).filter(|arg| !arg.is_empty()) {
            let argument = java_type_to_descriptor(argument)
                .map_err(|_| PointcutError::InvalidType(argument.to_string()))?;
            if argument == "V" {
                return Err(PointcutError::InvalidType("void".to_string()));
            }
            descriptor.push_str(&argument);
        }
        descriptor.push(')');
        let return_descriptor = java_type_to_descriptor(return_type)
            .map_err(|_| PointcutError::InvalidType(return_type.to_string()))?;
        if method == "<init>" && return_descriptor != "V" {
            return Err(malformed());
        }
        descriptor.push_str(&return_descriptor);

        Self::new(&binary_to_internal(owner), method, &descriptor)
    }

    pub fn is_constructor(&self) -> bool {
        self.method == "<init>"
    }
}

impl fmt::Display for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.method, self.descriptor)
    }
}
