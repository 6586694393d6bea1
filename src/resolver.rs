use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Variable,
    List,
    Broadcast,
    Argument,
}

impl RefKind {
    fn id_prefix(&self) -> &'static str {
        match self {
            RefKind::Variable => "var",
            RefKind::List => "list",
            RefKind::Broadcast => "broadcast",
            RefKind::Argument => "arg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Actor(String),
}

impl Scope {
    pub fn actor(name: impl Into<String>) -> Self {
        Scope::Actor(name.into())
    }
}

#[derive(Default)]
struct NamespaceTable {
    ids: HashMap<(RefKind, Scope, String), String>,
    counter: u64,
}

impl NamespaceTable {
    fn fresh_id(&mut self, kind: RefKind) -> String {
        self.counter += 1;
        format!("{}_{}", kind.id_prefix(), self.counter)
    }
}

/// Project-wide name -> id table for variables, lists, broadcasts and
/// custom-block arguments. Entries are only ever inserted, never changed or
/// removed within one compile/decompile pass, so the table can be shared
/// across threads translating scripts in parallel.
#[derive(Default)]
pub struct IdentifierNamespace {
    inner: Mutex<NamespaceTable>,
}

impl IdentifierNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent. Returns the already-registered id when the name
    /// exists in exactly this scope, making repeated registration (and
    /// re-running a cancelled script) harmless.
    pub fn register(
        &self,
        kind: RefKind,
        scope: Scope,
        name: &str,
        id: impl Into<String>,
    ) -> String {
        let mut table = self.inner.lock().unwrap();
        table
            .ids
            .entry((kind, scope, name.to_string()))
            .or_insert_with(|| id.into())
            .clone()
    }

    /// Resolution order: the actor's local scope first, then global.
    pub fn resolve(&self, kind: RefKind, scope: &Scope, name: &str) -> Option<String> {
        let table = self.inner.lock().unwrap();
        if let Scope::Actor(_) = scope {
            if let Some(id) = table.ids.get(&(kind, scope.clone(), name.to_string())) {
                return Some(id.clone());
            }
        }
        table
            .ids
            .get(&(kind, Scope::Global, name.to_string()))
            .cloned()
    }

    /// Resolves a name, declaring it with a fresh id in `declare_scope` when
    /// unknown. The bool is true when the name was newly declared.
    pub fn resolve_or_declare(
        &self,
        kind: RefKind,
        scope: &Scope,
        declare_scope: Scope,
        name: &str,
    ) -> (String, bool) {
        let mut table = self.inner.lock().unwrap();
        if let Scope::Actor(_) = scope {
            if let Some(id) = table.ids.get(&(kind, scope.clone(), name.to_string())) {
                return (id.clone(), false);
            }
        }
        if let Some(id) = table.ids.get(&(kind, Scope::Global, name.to_string())) {
            return (id.clone(), false);
        }
        let id = table.fresh_id(kind);
        table
            .ids
            .insert((kind, declare_scope, name.to_string()), id.clone());
        (id, true)
    }

    /// Reverse lookup, used when rendering a graph whose fields carry only
    /// an id.
    pub fn name_for_id(&self, kind: RefKind, id: &str) -> Option<String> {
        let table = self.inner.lock().unwrap();
        table
            .ids
            .iter()
            .find(|((entry_kind, _, _), entry_id)| *entry_kind == kind && entry_id.as_str() == id)
            .map(|((_, _, name), _)| name.clone())
    }

    pub fn contains(&self, kind: RefKind, scope: &Scope, name: &str) -> bool {
        self.resolve(kind, scope, name).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn local_shadows_global() {
        let ns = IdentifierNamespace::new();
        let global = ns.register(RefKind::Variable, Scope::Global, "x", "var_g");
        let local = ns.register(
            RefKind::Variable,
            Scope::actor("Sprite1"),
            "x",
            "var_l",
        );
        assert_ne!(global, local);
        assert_eq!(
            ns.resolve(RefKind::Variable, &Scope::actor("Sprite1"), "x"),
            Some("var_l".to_string())
        );
        assert_eq!(
            ns.resolve(RefKind::Variable, &Scope::actor("Sprite2"), "x"),
            Some("var_g".to_string())
        );
    }

    #[test]
    fn registration_is_idempotent() {
        let ns = IdentifierNamespace::new();
        let first = ns.register(RefKind::Broadcast, Scope::Global, "go", "broadcast_1");
        let second = ns.register(RefKind::Broadcast, Scope::Global, "go", "broadcast_99");
        assert_eq!(first, second);
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn implicit_declaration_lands_in_requested_scope() {
        let ns = IdentifierNamespace::new();
        let scope = Scope::actor("Sprite1");
        let (id, created) =
            ns.resolve_or_declare(RefKind::Variable, &scope, scope.clone(), "score");
        assert!(created);
        let (again, created_again) =
            ns.resolve_or_declare(RefKind::Variable, &scope, scope.clone(), "score");
        assert!(!created_again);
        assert_eq!(id, again);
        assert_eq!(ns.resolve(RefKind::Variable, &Scope::Global, "score"), None);
    }

    #[test]
    fn reverse_lookup_recovers_the_name() {
        let ns = IdentifierNamespace::new();
        ns.register(RefKind::Variable, Scope::Global, "score", "var_1");
        assert_eq!(
            ns.name_for_id(RefKind::Variable, "var_1"),
            Some("score".to_string())
        );
        assert_eq!(ns.name_for_id(RefKind::List, "var_1"), None);
    }

    #[test]
    fn kinds_do_not_collide() {
        let ns = IdentifierNamespace::new();
        ns.register(RefKind::Variable, Scope::Global, "data", "var_1");
        ns.register(RefKind::List, Scope::Global, "data", "list_1");
        assert_eq!(
            ns.resolve(RefKind::List, &Scope::Global, "data"),
            Some("list_1".to_string())
        );
        assert_eq!(
            ns.resolve(RefKind::Variable, &Scope::Global, "data"),
            Some("var_1".to_string())
        );
    }

    #[test]
    fn shared_across_threads() {
        let ns = Arc::new(IdentifierNamespace::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ns = Arc::clone(&ns);
                std::thread::spawn(move || {
                    ns.resolve_or_declare(
                        RefKind::Broadcast,
                        &Scope::Global,
                        Scope::Global,
                        "ping",
                    )
                    .0
                })
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(ns.len(), 1);
    }
}
