// Constant Table
//
// Restricted constant folding over item-level `const` and `static` items: string and
// integer literals, `Duration` constructors, `+ - *` on integers and references
// to other constants. Paths are resolved through `use` imports, `crate::`,
// `self::`, `super::`, child modules and, from a binary, the package's library
// crate. Nothing else is evaluated.

use crate::module_graph::{is_cfg_test, ModKey, ModuleGraph};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use syn::{BinOp, Expr, Lit, UseTree};

/// Bound on path indirections and const-to-const references
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConstValue {
    Str(String),
    Int(u128),
    Duration(Duration),
}

impl ConstValue {
    pub fn into_str(self) -> Option<String> {
        match self {
            ConstValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Durations as-is, bare integers as seconds
    pub fn into_duration(self) -> Option<Duration> {
        match self {
            ConstValue::Duration(d) => Some(d),
            ConstValue::Int(secs) => u64::try_from(secs).ok().map(Duration::from_secs),
            ConstValue::Str(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Scope {
    consts: HashMap<String, Expr>,
    uses: HashMap<String, Vec<String>>,
    globs: Vec<Vec<String>>,
    children: HashSet<String>,
}

pub(crate) struct ConstTable {
    scopes: HashMap<ModKey, Scope>,
    /// Library crate index and the name binaries reach it by
    lib_crate: Option<(usize, String)>,
}

impl ConstTable {
    pub fn build(graph: &ModuleGraph) -> Self {
        let mut scopes = HashMap::new();

        for module in &graph.modules {
            let mut scope = Scope::default();
            for item in &module.items {
                match item {
                    syn::Item::Const(c) if !is_cfg_test(&c.attrs) => {
                        scope.consts.insert(c.ident.to_string(), (*c.expr).clone());
                    }
                    syn::Item::Static(st)
                        if !is_cfg_test(&st.attrs)
                            && matches!(st.mutability, syn::StaticMutability::None) =>
                    {
                        scope.consts.insert(st.ident.to_string(), (*st.expr).clone());
                    }
                    syn::Item::Use(u) if !is_cfg_test(&u.attrs) => {
                        flatten_use(&u.tree, Vec::new(), &mut scope);
                    }
                    syn::Item::Mod(m) if !is_cfg_test(&m.attrs) => {
                        scope.children.insert(m.ident.to_string());
                    }
                    _ => {}
                }
            }
            scopes.insert(module.key.clone(), scope);
        }

        Self {
            scopes,
            lib_crate: graph.lib_crate().zip(graph.lib_name.clone()),
        }
    }

    /// Evaluate an expression appearing in module `scope`
    pub fn eval(&self, scope: &ModKey, expr: &Expr) -> Option<ConstValue> {
        self.eval_in(scope, expr, &mut Vec::new())
    }

    fn eval_in(
        &self,
        scope: &ModKey,
        expr: &Expr,
        stack: &mut Vec<(ModKey, String)>,
    ) -> Option<ConstValue> {
        match expr {
            Expr::Lit(lit) => match &lit.lit {
                Lit::Str(s) => Some(ConstValue::Str(s.value())),
                Lit::Int(i) => i.base10_parse::<u128>().ok().map(ConstValue::Int),
                _ => None,
            },
            Expr::Paren(p) => self.eval_in(scope, &p.expr, stack),
            Expr::Group(g) => self.eval_in(scope, &g.expr, stack),
            Expr::Cast(c) => match self.eval_in(scope, &c.expr, stack)? {
                ConstValue::Int(n) => Some(ConstValue::Int(n)),
                _ => None,
            },
            Expr::Path(p) if p.qself.is_none() => {
                let segments = plain_segments(&p.path)?;
                let target = self.resolve(scope, &segments, 0)?;
                if stack.contains(&target) || stack.len() >= MAX_DEPTH {
                    return None;
                }
                let value = self.scopes.get(&target.0)?.consts.get(&target.1)?;
                stack.push(target.clone());
                let result = self.eval_in(&target.0, value, stack);
                stack.pop();
                result
            }
            Expr::Binary(b) => {
                let (ConstValue::Int(l), ConstValue::Int(r)) = (
                    self.eval_in(scope, &b.left, stack)?,
                    self.eval_in(scope, &b.right, stack)?,
                ) else {
                    return None;
                };
                match b.op {
                    BinOp::Add(_) => l.checked_add(r),
                    BinOp::Sub(_) => l.checked_sub(r),
                    BinOp::Mul(_) => l.checked_mul(r),
                    _ => None,
                }
                .map(ConstValue::Int)
            }
            Expr::Call(call) if call.args.len() == 1 => {
                let Expr::Path(func) = &*call.func else {
                    return None;
                };
                let ctor = duration_ctor(&plain_segments(&func.path)?)?;
                let ConstValue::Int(n) = self.eval_in(scope, &call.args[0], stack)? else {
                    return None;
                };
                let n = u64::try_from(n).ok()?;
                ctor(n).map(ConstValue::Duration)
            }
            _ => None,
        }
    }

    /// Resolve a path written in `scope` to the module and name of a constant
    fn resolve(&self, scope: &ModKey, segments: &[String], depth: usize) -> Option<(ModKey, String)> {
        if depth > MAX_DEPTH || segments.is_empty() {
            return None;
        }
        let (crate_idx, module) = scope;

        match segments[0].as_str() {
            "crate" => self.lookup(&(*crate_idx, Vec::new()), &segments[1..], depth),
            "self" => self.lookup(scope, &segments[1..], depth),
            "super" => {
                let supers = segments.iter().take_while(|s| *s == "super").count();
                if supers > module.len() {
                    return None;
                }
                let parent = module[..module.len() - supers].to_vec();
                self.lookup(&(*crate_idx, parent), &segments[supers..], depth)
            }
            name if segments.len() == 1 => {
                let current = self.scopes.get(scope)?;
                if current.consts.contains_key(name) {
                    return Some((scope.clone(), name.to_string()));
                }
                if let Some(target) = current.uses.get(name) {
                    return self.resolve(scope, target, depth + 1);
                }
                current.globs.iter().find_map(|glob| {
                    let mut path = glob.clone();
                    path.push(name.to_string());
                    self.resolve(scope, &path, depth + 1)
                })
            }
            first => {
                let current = self.scopes.get(scope)?;
                if current.children.contains(first) {
                    let mut child = module.clone();
                    child.push(first.to_string());
                    return self.lookup(&(*crate_idx, child), &segments[1..], depth);
                }
                if let Some(target) = current.uses.get(first) {
                    let mut path = target.clone();
                    path.extend_from_slice(&segments[1..]);
                    return self.resolve(scope, &path, depth + 1);
                }
                // `my_app::names::ORDERS` written in a binary of the same package;
                // any other crate is a dependency and stays unresolved
                match &self.lib_crate {
                    Some((lib, lib_name)) if *lib != *crate_idx && first == lib_name.as_str() => {
                        self.lookup(&(*lib, Vec::new()), &segments[1..], depth)
                    }
                    _ => None,
                }
            }
        }
    }

    /// Walk `rest` (modules then a name) starting at `base`
    fn lookup(&self, base: &ModKey, rest: &[String], depth: usize) -> Option<(ModKey, String)> {
        let (name, modules) = rest.split_last()?;
        let mut key = base.clone();
        key.1.extend(modules.iter().cloned());
        if !self.scopes.contains_key(&key) {
            return None;
        }
        self.resolve(&key, std::slice::from_ref(name), depth + 1)
    }
}

fn flatten_use(tree: &UseTree, prefix: Vec<String>, scope: &mut Scope) {
    match tree {
        UseTree::Path(p) => {
            let mut next = prefix;
            next.push(p.ident.to_string());
            flatten_use(&p.tree, next, scope);
        }
        UseTree::Name(n) => {
            let ident = n.ident.to_string();
            if ident == "self" {
                if let Some(last) = prefix.last().cloned() {
                    scope.uses.insert(last, prefix);
                }
            } else {
                let mut target = prefix;
                target.push(ident.clone());
                scope.uses.insert(ident, target);
            }
        }
        UseTree::Rename(r) => {
            let ident = r.ident.to_string();
            let mut target = prefix;
            if ident != "self" {
                target.push(ident);
            }
            scope.uses.insert(r.rename.to_string(), target);
        }
        UseTree::Glob(_) => scope.globs.push(prefix),
        UseTree::Group(g) => {
            for item in &g.items {
                flatten_use(item, prefix.clone(), scope);
            }
        }
    }
}

/// Path segments, or `None` if any segment carries generic arguments
fn plain_segments(path: &syn::Path) -> Option<Vec<String>> {
    path.segments
        .iter()
        .map(|seg| seg.arguments.is_none().then(|| seg.ident.to_string()))
        .collect()
}

fn duration_ctor(segments: &[String]) -> Option<fn(u64) -> Option<Duration>> {
    let (method, rest) = segments.split_last()?;
    if rest.last().map(String::as_str) != Some("Duration") {
        return None;
    }
    let ctor: fn(u64) -> Option<Duration> = match method.as_str() {
        "from_secs" => |n| Some(Duration::from_secs(n)),
        "from_millis" => |n| Some(Duration::from_millis(n)),
        "from_mins" => |n| n.checked_mul(60).map(Duration::from_secs),
        "from_hours" => |n| n.checked_mul(3600).map(Duration::from_secs),
        _ => return None,
    };
    Some(ctor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_graph::Module;

    fn graph(modules: &[(&[&str], &str)]) -> ModuleGraph {
        let mut g = ModuleGraph::default();
        g.crates.push(crate::module_graph::CrateRoot {
            name: "lib".to_string(),
            file: "src/lib.rs".into(),
            is_lib: true,
        });
        for (path, source) in modules {
            g.modules.push(Module {
                key: (0, path.iter().map(|s| s.to_string()).collect()),
                file: "src/lib.rs".into(),
                items: syn::parse_file(source).unwrap().items,
            });
        }
        g
    }

    fn eval(table: &ConstTable, module: &[&str], expr: &str) -> Option<ConstValue> {
        let key = (0, module.iter().map(|s| s.to_string()).collect());
        table.eval(&key, &syn::parse_str::<Expr>(expr).unwrap())
    }

    #[test]
    fn test_literals_and_arithmetic() {
        let table = ConstTable::build(&graph(&[(
            &[],
            "const HOUR: u64 = 60 * 60; static NAME: &str = \"audit\"; static mut LIVE: &str = \"x\";",
        )]));

        assert_eq!(eval(&table, &[], "\"orders\""), Some(ConstValue::Str("orders".into())));
        assert_eq!(eval(&table, &[], "HOUR"), Some(ConstValue::Int(3600)));
        assert_eq!(eval(&table, &[], "NAME"), Some(ConstValue::Str("audit".into())));
        assert_eq!(eval(&table, &[], "LIVE"), None);
        assert_eq!(eval(&table, &[], "(HOUR + 1) as u64"), Some(ConstValue::Int(3601)));
        assert_eq!(eval(&table, &[], "HOUR / 2"), None);
        assert_eq!(eval(&table, &[], "1 - 2"), None);
    }

    #[test]
    fn test_duration_constructors() {
        let table = ConstTable::build(&graph(&[(
            &[],
            "const NIGHTLY: Duration = Duration::from_hours(1); const MINS: u64 = 5;",
        )]));

        assert_eq!(
            eval(&table, &[], "NIGHTLY"),
            Some(ConstValue::Duration(Duration::from_secs(3600)))
        );
        assert_eq!(
            eval(&table, &[], "std::time::Duration::from_mins(MINS)"),
            Some(ConstValue::Duration(Duration::from_secs(300)))
        );
        assert_eq!(eval(&table, &[], "Duration::from_secs(compute())"), None);
        assert_eq!(eval(&table, &[], "from_secs(5)"), None);
    }

    #[test]
    fn test_path_resolution() {
        let table = ConstTable::build(&graph(&[
            (&[], "mod names; mod app; use names::ORDERS as ORDER_QUEUE;"),
            (&["names"], "pub const ORDERS: &str = \"orders\"; pub const ALIAS: &str = ORDERS; pub mod inner {}"),
            (&["names", "inner"], "pub const DEEP: &str = super::ORDERS;"),
            (&["app"], "use crate::names::*; use super::names; use crate::names::inner::{self};"),
        ]));

        let orders = Some(ConstValue::Str("orders".into()));
        assert_eq!(eval(&table, &[], "ORDER_QUEUE"), orders);
        assert_eq!(eval(&table, &[], "names::ALIAS"), orders);
        assert_eq!(eval(&table, &[], "crate::names::inner::DEEP"), orders);
        assert_eq!(eval(&table, &["app"], "ORDERS"), orders);
        assert_eq!(eval(&table, &["app"], "names::ORDERS"), orders);
        assert_eq!(eval(&table, &["app"], "inner::DEEP"), orders);
        assert_eq!(eval(&table, &["app"], "self::ORDERS"), orders);
        assert_eq!(eval(&table, &["app"], "self::MISSING"), None);
        assert_eq!(eval(&table, &["names", "inner"], "super::super::ORDER_QUEUE"), orders);
        assert_eq!(eval(&table, &[], "UNKNOWN"), None);
    }

    #[test]
    fn test_binary_reaches_library_only_by_its_crate_name() {
        let mut g = graph(&[(&[], "pub mod names; pub const QUEUE: &str = \"mine\";"), (&["names"], "pub const ORDERS: &str = \"orders\";")]);
        g.crates.push(crate::module_graph::CrateRoot {
            name: "main".to_string(),
            file: "src/main.rs".into(),
            is_lib: false,
        });
        g.modules.push(Module {
            key: (1, vec![]),
            file: "src/main.rs".into(),
            items: vec![],
        });
        g.lib_name = Some("my_app".to_string());
        let table = ConstTable::build(&g);
        let bin = (1, vec![]);
        let eval_bin = |expr: &str| table.eval(&bin, &syn::parse_str::<Expr>(expr).unwrap());

        assert_eq!(eval_bin("my_app::QUEUE"), Some(ConstValue::Str("mine".into())));
        assert_eq!(eval_bin("my_app::names::ORDERS"), Some(ConstValue::Str("orders".into())));
        assert_eq!(eval_bin("some_dependency::QUEUE"), None);
        assert_eq!(eval_bin("some_dependency::names::ORDERS"), None);
    }

    #[test]
    fn test_cycles_terminate() {
        let table = ConstTable::build(&graph(&[(&[], "const A: &str = B; const B: &str = A;")]));
        assert_eq!(eval(&table, &[], "A"), None);
    }
}
