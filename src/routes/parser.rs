//! Route-definition discovery.
//!
//! The client declares its routes in a TS/TSX file as calls of an imported `route` function:
//!
//! ```ts
//! import { route } from "vorma/client";
//! route("/home", import("./home.tsx"));
//! route("/about", "./about.tsx", "Page", "AboutError");
//! const SETTINGS = "./settings.tsx";
//! route("/settings", SETTINGS);
//! ```
//!
//! The file is parsed with swc so TS and JSX syntax are tolerated, then the syntax tree is
//! walked for every `route(pattern, module, [exportKey], [errorExportKey])` call. Module
//! arguments are resolved from three forms: a string literal, `import("...")` with a literal,
//! or a reference to a `const` bound to a string literal. Anything else warns and is skipped.

use crate::error::RouteRegistryError;
use std::collections::HashMap;
use std::path::Path;
use swc_common::{FileName, SourceMap, sync::Lrc};
use swc_ecma_ast as ast;
use swc_ecma_parser::{Parser, StringInput, Syntax, TsSyntax, lexer::Lexer};
use swc_ecma_visit::{Visit, VisitWith};

/// One discovered `route(...)` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRoute {
    pub pattern: String,
    /// Module specifier as written, e.g. `./home.tsx`.
    pub module: String,
    pub export_key: Option<String>,
    pub error_export_key: Option<String>,
}

pub fn parse_routes_file(file: &Path, source: &str) -> Result<Vec<ParsedRoute>, RouteRegistryError> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        FileName::Real(file.to_path_buf()).into(),
        source.to_string(),
    );

    let lexer = Lexer::new(
        Syntax::Typescript(TsSyntax {
            tsx: true,
            ..Default::default()
        }),
        Default::default(),
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    let module = parser.parse_module().map_err(|err| RouteRegistryError::Syntax {
        file: file.to_path_buf(),
        message: format!("{err:?}"),
    })?;
    if let Some(err) = parser.take_errors().into_iter().next() {
        return Err(RouteRegistryError::Syntax {
            file: file.to_path_buf(),
            message: format!("{err:?}"),
        });
    }

    // Two passes: top-level string consts first, so forward references resolve too.
    let mut consts = ConstCollector::default();
    module.visit_with(&mut consts);

    let mut collector = RouteCollector {
        consts: consts.values,
        routes: vec![],
    };
    module.visit_with(&mut collector);

    Ok(collector.routes)
}

/// Collects `const NAME = "literal"` bindings.
#[derive(Default)]
struct ConstCollector {
    values: HashMap<String, String>,
}

impl Visit for ConstCollector {
    fn visit_var_decl(&mut self, node: &ast::VarDecl) {
        if node.kind == ast::VarDeclKind::Const {
            for decl in &node.decls {
                if let (ast::Pat::Ident(name), Some(init)) = (&decl.name, &decl.init) {
                    if let ast::Expr::Lit(ast::Lit::Str(value)) = init.as_ref() {
                        self.values
                            .insert(name.id.sym.to_string(), value.value.to_string_lossy().into_owned());
                    }
                }
            }
        }
        node.visit_children_with(self);
    }
}

struct RouteCollector {
    consts: HashMap<String, String>,
    routes: Vec<ParsedRoute>,
}

impl RouteCollector {
    fn resolve_module(&self, expr: &ast::Expr) -> Option<String> {
        match expr {
            // "./home.tsx"
            ast::Expr::Lit(ast::Lit::Str(value)) => Some(value.value.to_string_lossy().into_owned()),
            // import("./home.tsx")
            ast::Expr::Call(call) => {
                if !matches!(call.callee, ast::Callee::Import(_)) {
                    return None;
                }
                match call.args.first().map(|arg| arg.expr.as_ref()) {
                    Some(ast::Expr::Lit(ast::Lit::Str(value))) => Some(value.value.to_string_lossy().into_owned()),
                    _ => None,
                }
            }
            // const HOME = "./home.tsx"; route("/", HOME)
            ast::Expr::Ident(ident) => self.consts.get(ident.sym.as_str()).cloned(),
            _ => None,
        }
    }
}

fn string_arg(args: &[ast::ExprOrSpread], index: usize) -> Option<String> {
    match args.get(index).map(|arg| arg.expr.as_ref()) {
        Some(ast::Expr::Lit(ast::Lit::Str(value))) => Some(value.value.to_string_lossy().into_owned()),
        _ => None,
    }
}

impl Visit for RouteCollector {
    fn visit_call_expr(&mut self, node: &ast::CallExpr) {
        node.visit_children_with(self);

        let ast::Callee::Expr(callee) = &node.callee else {
            return;
        };
        let ast::Expr::Ident(ident) = callee.as_ref() else {
            return;
        };
        if ident.sym.as_str() != "route" {
            return;
        }

        let Some(pattern) = string_arg(&node.args, 0) else {
            tracing::warn!("route() call with non-literal pattern skipped");
            return;
        };
        let Some(module) = node
            .args
            .get(1)
            .and_then(|arg| self.resolve_module(&arg.expr))
        else {
            tracing::warn!(
                pattern,
                "route() module argument is not a string literal, import(\"...\") literal, or const-bound literal; skipped"
            );
            return;
        };

        self.routes.push(ParsedRoute {
            pattern,
            module,
            export_key: string_arg(&node.args, 2),
            error_export_key: string_arg(&node.args, 3),
        });
    }
}
