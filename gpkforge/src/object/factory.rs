//! Class-name keyed object construction.
//!
//! Polymorphic instantiation is driven by a registered constructor table
//! rather than a central switch, so new kinds can be added without touching
//! the loader. Unknown class names fall back to [`GenericKind`], which
//! preserves the payload verbatim.

use dashmap::DashMap;
use tracing::trace;

use super::kinds::{ClassKind, GenericKind, ObjectKind, RedirectorKind, TextureKind};

/// Constructor for one object kind.
pub type KindCtor = fn() -> Box<dyn ObjectKind>;

/// Registry mapping class names to kind constructors.
pub struct ClassFactory {
    ctors: DashMap<String, KindCtor>,
}

impl ClassFactory {
    /// An empty factory: every class resolves to the generic kind.
    pub fn new() -> Self {
        Self {
            ctors: DashMap::new(),
        }
    }

    /// A factory with the built-in kinds registered.
    pub fn with_builtins() -> Self {
        let factory = Self::new();
        factory.register("Class", || Box::<ClassKind>::default());
        factory.register("Texture2D", || Box::<TextureKind>::default());
        factory.register("TextureCube", || Box::<TextureKind>::default());
        factory.register("ObjectRedirector", || Box::<RedirectorKind>::default());
        factory
    }

    /// Register (or replace) the constructor for `class_name`.
    pub fn register(&self, class_name: &str, ctor: KindCtor) {
        self.ctors.insert(class_name.to_string(), ctor);
    }

    /// Instantiate the kind for `class_name`.
    pub fn create(&self, class_name: &str) -> Box<dyn ObjectKind> {
        match self.ctors.get(class_name) {
            Some(ctor) => ctor(),
            None => {
                trace!(class = class_name, "no registered kind, using generic");
                Box::<GenericKind>::default()
            }
        }
    }
}

impl Default for ClassFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        let factory = ClassFactory::with_builtins();
        assert_eq!(factory.create("Class").kind_name(), "Class");
        assert_eq!(factory.create("Texture2D").kind_name(), "Texture");
        assert_eq!(
            factory.create("ObjectRedirector").kind_name(),
            "ObjectRedirector"
        );
    }

    #[test]
    fn test_unknown_class_falls_back_to_generic() {
        let factory = ClassFactory::with_builtins();
        assert_eq!(factory.create("SkeletalMesh").kind_name(), "Generic");
    }

    #[test]
    fn test_registration_is_open() {
        let factory = ClassFactory::with_builtins();
        factory.register("SoundNodeWave", || Box::<TextureKind>::default());
        assert_eq!(factory.create("SoundNodeWave").kind_name(), "Texture");
    }
}
