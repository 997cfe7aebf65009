//! Class descriptions: the source of type annotations.
//!
//! A [`ClassDef`] plays the role runtime reflection plays elsewhere: it lists
//! a class's own annotations, its bases and, for record-like classes, the
//! record field bookkeeping (defaults, init participation, metadata).

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::AnnotationError;
use crate::hint::TypeHint;

/// Shared handle to a class description.
pub type ClassRef = Arc<ClassDef>;

/// A record field as tracked by a record-like class.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub hint: TypeHint,
    /// Plain default value.
    pub default: Option<Value>,
    /// Default produced by a factory at construction time.
    pub has_factory: bool,
    /// Whether the attribute is accepted by the constructor.
    pub init: bool,
    pub metadata: Map<String, Value>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, hint: TypeHint) -> Self {
        Self {
            name: name.into(),
            hint,
            default: None,
            has_factory: false,
            init: true,
            metadata: Map::new(),
        }
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn factory(mut self) -> Self {
        self.has_factory = true;
        self
    }

    pub fn init(mut self, init: bool) -> Self {
        self.init = init;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the attribute can be omitted at construction.
    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.has_factory
    }
}

/// Description of a class and its annotations.
#[derive(Debug)]
pub struct ClassDef {
    name: String,
    bases: Vec<ClassRef>,
    // Linearized ancestors, nearest first, excluding this class.
    ancestors: Vec<ClassRef>,
    annotations: Vec<(String, TypeHint)>,
    attributes: Option<Vec<Attribute>>,
}

impl ClassDef {
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            bases: Vec::new(),
            annotations: Vec::new(),
            attributes: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The hint referring to this class.
    pub fn hint(&self) -> TypeHint {
        TypeHint::Named(self.name.clone())
    }

    pub fn bases(&self) -> &[ClassRef] {
        &self.bases
    }

    /// Annotations declared on this class only.
    pub fn own_annotations(&self) -> &[(String, TypeHint)] {
        &self.annotations
    }

    /// This class followed by its ancestors in resolution order.
    pub fn mro(&self) -> impl Iterator<Item = &ClassDef> {
        std::iter::once(self).chain(self.ancestors.iter().map(|a| a.as_ref()))
    }

    /// Annotations merged across the ancestor chain, base to derived, so a
    /// derived re-declaration replaces the inherited hint.
    pub fn type_hints(&self) -> Vec<(String, TypeHint)> {
        let classes: Vec<&ClassDef> = self.mro().collect();
        let mut hints: Vec<(String, TypeHint)> = Vec::new();
        for class in classes.into_iter().rev() {
            for (name, hint) in &class.annotations {
                upsert(&mut hints, name, hint.clone());
            }
        }
        hints
    }

    /// Record field bookkeeping merged across the ancestor chain, or `None`
    /// when no class in the chain is record-like.
    pub fn record_fields(&self) -> Option<Vec<&Attribute>> {
        let classes: Vec<&ClassDef> = self.mro().collect();
        let mut fields: Option<Vec<&Attribute>> = None;
        for class in classes.into_iter().rev() {
            let Some(own) = &class.attributes else {
                continue;
            };
            let merged = fields.get_or_insert_with(Vec::new);
            for attr in own {
                match merged.iter_mut().find(|a| a.name == attr.name) {
                    Some(slot) => *slot = attr,
                    None => merged.push(attr),
                }
            }
        }
        fields
    }

    pub fn record_field(&self, name: &str) -> Option<&Attribute> {
        self.mro()
            .filter_map(|class| class.attributes.as_ref())
            .find_map(|attrs| attrs.iter().find(|a| a.name == name))
    }
}

/// Builder for [`ClassDef`].
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    name: String,
    bases: Vec<ClassRef>,
    annotations: Vec<(String, TypeHint)>,
    attributes: Option<Vec<Attribute>>,
}

impl ClassBuilder {
    pub fn extends(mut self, base: &ClassRef) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    /// Declare an annotation without record bookkeeping.
    pub fn annotate(mut self, name: impl Into<String>, hint: TypeHint) -> Self {
        upsert(&mut self.annotations, &name.into(), hint);
        self
    }

    /// Declare a record field; this also annotates it.
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        upsert(&mut self.annotations, &attribute.name, attribute.hint.clone());
        let attrs = self.attributes.get_or_insert_with(Vec::new);
        attrs.retain(|a| a.name != attribute.name);
        attrs.push(attribute);
        self
    }

    /// Mark the class as record-like even without fields of its own.
    pub fn record(mut self) -> Self {
        self.attributes.get_or_insert_with(Vec::new);
        self
    }

    /// # Errors
    ///
    /// Returns `AnnotationError::InconsistentHierarchy` when the bases cannot
    /// be linearized.
    pub fn build(self) -> Result<ClassRef, AnnotationError> {
        let ancestors = linearize(
            &self.bases,
            |base: &ClassRef| base.ancestors.clone(),
            |a, b| Arc::ptr_eq(a, b),
        )
        .ok_or_else(|| AnnotationError::InconsistentHierarchy {
            name: self.name.clone(),
        })?;

        Ok(Arc::new(ClassDef {
            name: self.name,
            bases: self.bases,
            ancestors,
            annotations: self.annotations,
            attributes: self.attributes,
        }))
    }
}

fn upsert(entries: &mut Vec<(String, TypeHint)>, name: &str, hint: TypeHint) {
    match entries.iter_mut().find(|(n, _)| n == name) {
        Some(entry) => entry.1 = hint,
        None => entries.push((name.to_string(), hint)),
    }
}

/// C3 linearization of the ancestors implied by `bases`.
///
/// `ancestors_of` returns an already linearized base's own ancestors.
/// Returns `None` when no consistent order exists.
pub(crate) fn linearize<T, A, S>(bases: &[T], ancestors_of: A, same: S) -> Option<Vec<T>>
where
    T: Clone,
    A: Fn(&T) -> Vec<T>,
    S: Fn(&T, &T) -> bool,
{
    let mut sequences: Vec<Vec<T>> = bases
        .iter()
        .map(|base| {
            let mut seq = vec![base.clone()];
            seq.extend(ancestors_of(base));
            seq
        })
        .collect();
    sequences.push(bases.to_vec());

    let mut result: Vec<T> = Vec::new();
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }

        let head = sequences
            .iter()
            .map(|seq| &seq[0])
            .find(|&candidate| {
                !sequences
                    .iter()
                    .any(|seq| seq[1..].iter().any(|item| same(item, candidate)))
            })?
            .clone();

        for seq in &mut sequences {
            if same(&seq[0], &head) {
                seq.remove(0);
            }
        }
        result.push(head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int() -> TypeHint {
        TypeHint::named("int")
    }

    #[test]
    fn derived_annotations_win() {
        let base = ClassDef::builder("Base")
            .annotate("id", int())
            .annotate("name", TypeHint::named("str"))
            .build()
            .unwrap();
        let derived = ClassDef::builder("Derived")
            .extends(&base)
            .annotate("id", TypeHint::named("UUID"))
            .annotate("extra", int())
            .build()
            .unwrap();

        let hints = derived.type_hints();
        let names: Vec<&str> = hints.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["id", "name", "extra"]);
        assert_eq!(hints[0].1, TypeHint::named("UUID"));
    }

    #[test]
    fn diamond_follows_c3_order() {
        let a = ClassDef::builder("A").build().unwrap();
        let b = ClassDef::builder("B").extends(&a).build().unwrap();
        let c = ClassDef::builder("C").extends(&a).build().unwrap();
        let d = ClassDef::builder("D").extends(&b).extends(&c).build().unwrap();

        let order: Vec<&str> = d.mro().map(|c| c.name()).collect();
        assert_eq!(order, ["D", "B", "C", "A"]);
    }

    #[test]
    fn diamond_annotation_precedence() {
        let a = ClassDef::builder("A").annotate("x", int()).build().unwrap();
        let b = ClassDef::builder("B").extends(&a).build().unwrap();
        let c = ClassDef::builder("C")
            .extends(&a)
            .annotate("x", TypeHint::named("str"))
            .build()
            .unwrap();
        let d = ClassDef::builder("D").extends(&b).extends(&c).build().unwrap();

        assert_eq!(d.type_hints(), vec![("x".to_string(), TypeHint::named("str"))]);
    }

    #[test]
    fn inconsistent_hierarchy_is_rejected() {
        let a = ClassDef::builder("A").build().unwrap();
        let b = ClassDef::builder("B").extends(&a).build().unwrap();
        let err = ClassDef::builder("C").extends(&a).extends(&b).build().unwrap_err();
        assert!(matches!(err, AnnotationError::InconsistentHierarchy { name } if name == "C"));
    }

    #[test]
    fn record_fields_are_inherited_and_overridden() {
        let base = ClassDef::builder("Base")
            .attribute(Attribute::new("a", int()))
            .attribute(Attribute::new("b", int()).default(json!(1)))
            .build()
            .unwrap();
        let derived = ClassDef::builder("Derived")
            .extends(&base)
            .attribute(Attribute::new("b", int()).default(json!(2)))
            .build()
            .unwrap();

        let fields = derived.record_fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].default, Some(json!(2)));
        assert_eq!(derived.record_field("a").map(|a| a.name.as_str()), Some("a"));
    }

    #[test]
    fn plain_classes_have_no_record_fields() {
        let plain = ClassDef::builder("Plain").annotate("a", int()).build().unwrap();
        assert!(plain.record_fields().is_none());
        assert!(plain.record_field("a").is_none());

        let empty_record = ClassDef::builder("Empty").record().build().unwrap();
        assert_eq!(empty_record.record_fields().map(|f| f.len()), Some(0));
    }

    #[test]
    fn attribute_defaults() {
        assert!(!Attribute::new("a", int()).has_default());
        assert!(Attribute::new("a", int()).factory().has_default());
        assert!(Attribute::new("a", int()).default(json!(0)).has_default());
    }
}
