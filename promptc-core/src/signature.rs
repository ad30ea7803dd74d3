//! Typed input/output contracts for language-model tasks.
//!
//! A [`Signature`] is built once through [`build_signature`] and never
//! mutated afterwards. Deserialization goes through the same validation.

use crate::error::{FieldRole, SignatureError};
use promptc_common::{Example, FieldSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Validated task contract: instructions plus ordered input and output fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SignatureParts", into = "SignatureParts")]
pub struct Signature {
    instructions: String,
    input_fields: Vec<FieldSpec>,
    output_fields: Vec<FieldSpec>,
}

/// Unvalidated wire form of a [`Signature`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureParts {
    #[serde(default)]
    pub instructions: String,
    pub input_fields: Vec<FieldSpec>,
    pub output_fields: Vec<FieldSpec>,
}

impl TryFrom<SignatureParts> for Signature {
    type Error = SignatureError;

    fn try_from(parts: SignatureParts) -> Result<Self, Self::Error> {
        validate_fields(&parts.input_fields, FieldRole::Input)?;
        validate_fields(&parts.output_fields, FieldRole::Output)?;
        Ok(Self {
            instructions: parts.instructions,
            input_fields: parts.input_fields,
            output_fields: parts.output_fields,
        })
    }
}

impl From<Signature> for SignatureParts {
    fn from(signature: Signature) -> Self {
        Self {
            instructions: signature.instructions,
            input_fields: signature.input_fields,
            output_fields: signature.output_fields,
        }
    }
}

fn validate_fields(fields: &[FieldSpec], role: FieldRole) -> Result<(), SignatureError> {
    if fields.is_empty() {
        return Err(SignatureError::NoFields { role });
    }

    let mut seen = HashSet::new();
    for (position, field) in fields.iter().enumerate() {
        if field.name.trim().is_empty() {
            return Err(SignatureError::EmptyFieldName { role, position });
        }
        if !is_identifier(&field.name) {
            return Err(SignatureError::InvalidFieldName {
                role,
                name: field.name.clone(),
            });
        }
        if !seen.insert(field.name.as_str()) {
            return Err(SignatureError::DuplicateField {
                role,
                name: field.name.clone(),
            });
        }
    }
    Ok(())
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the names the chat markers can carry.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn zip_fields<S: AsRef<str>>(
    names: &[S],
    descriptions: Option<&[S]>,
    role: FieldRole,
) -> Result<Vec<FieldSpec>, SignatureError> {
    let descriptions = descriptions.unwrap_or(&[]);
    if descriptions.len() > names.len() {
        return Err(SignatureError::TooManyDescriptions {
            role,
            fields: names.len(),
            descriptions: descriptions.len(),
        });
    }

    Ok(names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let spec = FieldSpec::new(name.as_ref());
            match descriptions.get(i) {
                Some(description) => spec.with_description(description.as_ref()),
                None => spec,
            }
        })
        .collect())
}

/// Build a validated signature.
///
/// Descriptions are matched to fields by position; missing ones default to
/// empty. Fails on an empty field list, an empty, non-identifier or
/// duplicate name within a list, or more descriptions than fields. An input and an output may share
/// a name.
pub fn build_signature<S: AsRef<str>>(
    input_fields: &[S],
    output_fields: &[S],
    instructions: &str,
    input_descriptions: Option<&[S]>,
    output_descriptions: Option<&[S]>,
) -> Result<Signature, SignatureError> {
    let inputs = zip_fields(input_fields, input_descriptions, FieldRole::Input)?;
    let outputs = zip_fields(output_fields, output_descriptions, FieldRole::Output)?;

    Signature::try_from(SignatureParts {
        instructions: instructions.to_string(),
        input_fields: inputs,
        output_fields: outputs,
    })
}

impl Signature {
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn input_fields(&self) -> &[FieldSpec] {
        &self.input_fields
    }

    pub fn output_fields(&self) -> &[FieldSpec] {
        &self.output_fields
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.input_fields.iter().map(|f| f.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.output_fields.iter().map(|f| f.name.as_str())
    }

    pub fn is_input(&self, name: &str) -> bool {
        self.input_names().any(|n| n == name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.output_names().any(|n| n == name)
    }

    /// Copy with replaced instructions; fields are untouched.
    pub fn with_instructions(&self, instructions: impl Into<String>) -> Signature {
        Signature {
            instructions: instructions.into(),
            input_fields: self.input_fields.clone(),
            output_fields: self.output_fields.clone(),
        }
    }

    /// Renders as `a, b -> c`.
    pub fn display_string(&self) -> String {
        format!(
            "{} -> {}",
            self.input_names().collect::<Vec<_>>().join(", "),
            self.output_names().collect::<Vec<_>>().join(", ")
        )
    }

    /// Reject examples missing any input field.
    pub fn check_inputs(&self, example: &Example) -> Result<(), SignatureError> {
        check_present(example, self.input_names(), FieldRole::Input)
    }

    /// Reject examples missing any output field.
    pub fn check_outputs(&self, example: &Example) -> Result<(), SignatureError> {
        check_present(example, self.output_names(), FieldRole::Output)
    }

    /// Accept an example only when every key is a declared field and every
    /// input is present.
    pub fn example_from(&self, example: Example) -> Result<Example, SignatureError> {
        if let Some(unknown) = example
            .keys()
            .find(|key| !self.is_input(key) && !self.is_output(key))
        {
            return Err(SignatureError::UnknownField {
                field: unknown.to_string(),
            });
        }
        self.check_inputs(&example)?;
        Ok(example)
    }

    pub fn inputs_of(&self, example: &Example) -> Example {
        example.project(self.input_names())
    }

    pub fn outputs_of(&self, example: &Example) -> Example {
        example.project(self.output_names())
    }
}

fn check_present<'a>(
    example: &Example,
    mut names: impl Iterator<Item = &'a str>,
    role: FieldRole,
) -> Result<(), SignatureError> {
    match names.find(|name| !example.contains(name)) {
        Some(field) => Err(SignatureError::MissingField {
            role,
            field: field.to_string(),
        }),
        None => Ok(()),
    }
}
