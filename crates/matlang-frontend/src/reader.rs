//! XML-to-IIR decoding.
//!
//! Decodes the parser front-end's reply schema: a `CompilationUnits`
//! root holding `FunctionList` and `Script` units, with the statement
//! and expression vocabulary described below. Unknown tags are schema
//! errors; an `errorlist` root carries front-end source errors.
//!
//! A multi-target assignment arrives with a one-row `MatrixExpr` on the
//! left-hand side; `elseif` chains arrive as repeated `IfBlock`s folded
//! here into nested if-else; a three-part range arrives with its
//! children ordered start, step, stop.

use matlang_core::expr::{BinOp, Expr, ExprKind, UnOp};
use matlang_core::function::{FuncRef, Function, ProgFunction};
use matlang_core::heap;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;

use crate::error::FrontendError;
use crate::xml::{self, XmlNode};

/// Parses a front-end reply into heap-allocated program functions.
///
/// Scripts become program functions with the script flag set, no
/// parameters, and the script text's statements as the body.
pub fn read_compilation_units(reply: &str) -> Result<Vec<FuncRef>, FrontendError> {
    let root = xml::parse(reply)?;
    if root.name == "errorlist" {
        return Err(FrontendError::SourceErrors(collect_error_text(&root)));
    }
    if root.name != "CompilationUnits" {
        return Err(FrontendError::Schema(format!(
            "expected <CompilationUnits>, got <{}>",
            root.name
        )));
    }
    let mut units = Vec::new();
    for child in &root.children {
        match child.name.as_str() {
            "FunctionList" => {
                for elem in &child.children {
                    match elem.name.as_str() {
                        "Function" => units.push(read_function(elem)?),
                        // Symbol tables carry front-end bookkeeping the
                        // core rebuilds itself.
                        "Symboltable" => {}
                        other => {
                            return Err(FrontendError::Schema(format!(
                                "unexpected <{}> in function list",
                                other
                            )))
                        }
                    }
                }
            }
            "Script" => units.push(read_script(child)?),
            other => {
                return Err(FrontendError::Schema(format!(
                    "unexpected <{}> in compilation units",
                    other
                )))
            }
        }
    }
    Ok(units)
}

fn collect_error_text(root: &XmlNode) -> String {
    let mut out = String::new();
    for child in &root.children {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(child.attr("message").unwrap_or(&child.text));
    }
    out
}

fn read_function(elem: &XmlNode) -> Result<FuncRef, FrontendError> {
    let name = elem.string_attr("name")?.to_string();
    let mut in_params = Vec::new();
    let mut out_params = Vec::new();
    let mut nested = Vec::new();
    let mut body = StmtSeq::empty();

    for child in &elem.children {
        match child.name.as_str() {
            "InputParamList" => in_params = read_param_list(child)?,
            "OutputParamList" => out_params = read_param_list(child)?,
            "NestedFunctionList" => {
                for nested_elem in &child.children {
                    nested.push(read_function(nested_elem)?);
                }
            }
            "StmtList" => body = read_stmt_list(child)?,
            "Symboltable" => {}
            other => {
                return Err(FrontendError::Schema(format!(
                    "unexpected <{}> in function '{}'",
                    other, name
                )))
            }
        }
    }

    let prog = ProgFunction::new(name, in_params, out_params, body);
    let func = heap::alloc_func(Function::Prog(prog));
    for &child in &nested {
        func.as_prog()
            .expect("just allocated as a program function")
            .nested
            .borrow_mut()
            .push(child);
    }
    Ok(func)
}

fn read_script(elem: &XmlNode) -> Result<FuncRef, FrontendError> {
    let name = elem.attr("name").unwrap_or("script").to_string();
    let mut body = StmtSeq::empty();
    for child in &elem.children {
        match child.name.as_str() {
            "StmtList" => body = read_stmt_list(child)?,
            "Symboltable" => {}
            other => {
                return Err(FrontendError::Schema(format!(
                    "unexpected <{}> in script",
                    other
                )))
            }
        }
    }
    let mut prog = ProgFunction::new(name, Vec::new(), Vec::new(), body);
    prog.is_script = true;
    Ok(heap::alloc_func(Function::Prog(prog)))
}

fn read_param_list(elem: &XmlNode) -> Result<Vec<Symbol>, FrontendError> {
    elem.children
        .iter()
        .map(|c| Ok(Symbol::intern(c.string_attr("nameId")?)))
        .collect()
}

fn read_stmt_list(elem: &XmlNode) -> Result<StmtSeq, FrontendError> {
    let stmts: Result<Vec<Stmt>, FrontendError> =
        elem.children.iter().map(read_stmt).collect();
    Ok(StmtSeq::new(stmts?))
}

fn read_stmt(elem: &XmlNode) -> Result<Stmt, FrontendError> {
    match elem.name.as_str() {
        "AssignStmt" => {
            let left_elem = elem.child(0)?;
            // Multi-target assignments wrap their targets in a one-row
            // matrix expression.
            let lhs = if left_elem.name == "MatrixExpr" {
                let row = left_elem.child(0)?;
                if left_elem.children.len() != 1 || row.name != "Row" {
                    return Err(FrontendError::Schema(
                        "invalid matrix expression on assignment lhs".into(),
                    ));
                }
                row.children
                    .iter()
                    .map(read_expr)
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                vec![read_expr(left_elem)?]
            };
            let rhs = read_expr(elem.child(1)?)?;
            Ok(Stmt::with_suppress(
                StmtKind::Assign { lhs, rhs },
                elem.bool_attr("outputSuppressed")?,
            ))
        }
        "ExprStmt" => Ok(Stmt::with_suppress(
            StmtKind::Expr(read_expr(elem.child(0)?)?),
            elem.bool_attr("outputSuppressed")?,
        )),
        "IfStmt" => read_if_stmt(elem),
        "SwitchStmt" => read_switch_stmt(elem),
        "ForStmt" => {
            // child 0 is the induction assignment `var = iter`.
            let assign = elem.child(0)?;
            if assign.name != "AssignStmt" {
                return Err(FrontendError::Schema(
                    "for statement requires an induction assignment".into(),
                ));
            }
            let var = match read_expr(assign.child(0)?)?.kind {
                ExprKind::Symbol(s) => s,
                _ => {
                    return Err(FrontendError::Schema(
                        "for induction target must be a name".into(),
                    ))
                }
            };
            let iter = read_expr(assign.child(1)?)?;
            let body = read_stmt_list(elem.child(1)?)?;
            Ok(Stmt::new(StmtKind::For { var, iter, body }))
        }
        "WhileStmt" => {
            let cond = read_expr(elem.child(0)?)?;
            let body = read_stmt_list(elem.child(1)?)?;
            Ok(Stmt::new(StmtKind::While { cond, body }))
        }
        "BreakStmt" => Ok(Stmt::new(StmtKind::Break)),
        "ContinueStmt" => Ok(Stmt::new(StmtKind::Continue)),
        "ReturnStmt" => Ok(Stmt::new(StmtKind::Return)),
        other => Err(FrontendError::Schema(format!(
            "unsupported statement type: <{}>",
            other
        ))),
    }
}

fn read_if_stmt(elem: &XmlNode) -> Result<Stmt, FrontendError> {
    let mut if_blocks = Vec::new();
    let mut else_block = None;
    for child in &elem.children {
        match child.name.as_str() {
            "IfBlock" => if_blocks.push(child),
            "ElseBlock" => {
                if else_block.is_some() {
                    return Err(FrontendError::Schema(
                        "duplicate else block in if statement".into(),
                    ));
                }
                else_block = Some(child);
            }
            other => {
                return Err(FrontendError::Schema(format!(
                    "invalid element in if statement: <{}>",
                    other
                )))
            }
        }
    }
    let Some(last) = if_blocks.pop() else {
        return Err(FrontendError::Schema("missing if block".into()));
    };

    // Build inside-out: the last if block pairs with the else block,
    // earlier blocks (elseif chain) nest it in their else branch.
    let else_seq = match else_block {
        Some(b) => read_stmt_list(b.child(0)?)?,
        None => StmtSeq::empty(),
    };
    let mut stmt = Stmt::new(StmtKind::IfElse {
        cond: read_expr(last.child(0)?)?,
        then_seq: read_stmt_list(last.child(1)?)?,
        else_seq,
    });
    for block in if_blocks.into_iter().rev() {
        stmt = Stmt::new(StmtKind::IfElse {
            cond: read_expr(block.child(0)?)?,
            then_seq: read_stmt_list(block.child(1)?)?,
            else_seq: StmtSeq::single(stmt),
        });
    }
    Ok(stmt)
}

fn read_switch_stmt(elem: &XmlNode) -> Result<Stmt, FrontendError> {
    let value = read_expr(elem.child(0)?)?;
    let mut cases = Vec::new();
    let mut default = None;
    for child in elem.children.iter().skip(1) {
        match child.name.as_str() {
            "SwitchCaseBlock" => {
                cases.push((read_expr(child.child(0)?)?, read_stmt_list(child.child(1)?)?));
            }
            "DefaultCaseBlock" => {
                if default.is_some() {
                    return Err(FrontendError::Schema(
                        "duplicate default case in switch statement".into(),
                    ));
                }
                default = Some(read_stmt_list(child.child(0)?)?);
            }
            other => {
                return Err(FrontendError::Schema(format!(
                    "invalid element in switch statement: <{}>",
                    other
                )))
            }
        }
    }
    Ok(Stmt::new(StmtKind::Switch {
        value,
        cases,
        default,
    }))
}

fn read_expr(elem: &XmlNode) -> Result<Expr, FrontendError> {
    let kind = match elem.name.as_str() {
        "NameExpr" => ExprKind::Symbol(read_name(elem.child(0)?)?),
        "IntLiteralExpr" => {
            let value = elem.string_attr("value")?;
            ExprKind::IntConst(value.parse().map_err(|_| {
                FrontendError::Schema(format!("invalid integer literal '{}'", value))
            })?)
        }
        "FPLiteralExpr" => {
            let value = elem.string_attr("value")?;
            ExprKind::FpConst(value.parse().map_err(|_| {
                FrontendError::Schema(format!("invalid float literal '{}'", value))
            })?)
        }
        "StringLiteralExpr" => ExprKind::StrConst(elem.string_attr("value")?.to_string()),
        "ParameterizedExpr" => {
            let symbol = head_symbol(elem.child(0)?)?;
            let args = elem.children[1..]
                .iter()
                .map(read_expr)
                .collect::<Result<Vec<_>, _>>()?;
            ExprKind::Param { symbol, args }
        }
        "CellIndexExpr" => {
            let symbol = head_symbol(elem.child(0)?)?;
            let args = elem.children[1..]
                .iter()
                .map(read_expr)
                .collect::<Result<Vec<_>, _>>()?;
            ExprKind::CellIndex { symbol, args }
        }
        "ColonExpr" => ExprKind::Range {
            start: None,
            step: None,
            stop: None,
        },
        "RangeExpr" => match elem.children.len() {
            // start : stop
            2 => ExprKind::Range {
                start: Some(Box::new(read_expr(elem.child(0)?)?)),
                step: None,
                stop: Some(Box::new(read_expr(elem.child(1)?)?)),
            },
            // start : step : stop
            3 => ExprKind::Range {
                start: Some(Box::new(read_expr(elem.child(0)?)?)),
                step: Some(Box::new(read_expr(elem.child(1)?)?)),
                stop: Some(Box::new(read_expr(elem.child(2)?)?)),
            },
            n => {
                return Err(FrontendError::Schema(format!(
                    "range expression with {} components",
                    n
                )))
            }
        },
        "EndExpr" => ExprKind::End { assocs: Vec::new() },
        "MatrixExpr" => ExprKind::Matrix {
            rows: read_rows(elem)?,
        },
        "CellArrayExpr" => ExprKind::CellArray {
            rows: read_rows(elem)?,
        },
        "FunctionHandleExpr" => ExprKind::FnHandle(read_name(elem.child(0)?)?),
        "LambdaExpr" => {
            let params = read_param_list(elem.child(0)?)?;
            let body = read_expr(elem.child(1)?)?;
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            }
        }
        // Unary operators.
        "UPlusExpr" => unary(UnOp::Plus, elem)?,
        "UMinusExpr" => unary(UnOp::Minus, elem)?,
        "NotExpr" => unary(UnOp::Not, elem)?,
        "ArrayTransposeExpr" => unary(UnOp::Transpose, elem)?,
        "MTransposeExpr" => unary(UnOp::CtransPose, elem)?,
        // Binary operators.
        "PlusExpr" => binary(BinOp::Add, elem)?,
        "MinusExpr" => binary(BinOp::Sub, elem)?,
        "MTimesExpr" => binary(BinOp::Mult, elem)?,
        "ETimesExpr" => binary(BinOp::ElemMult, elem)?,
        "MDivExpr" => binary(BinOp::Div, elem)?,
        "EDivExpr" => binary(BinOp::ElemDiv, elem)?,
        "MLDivExpr" => binary(BinOp::LeftDiv, elem)?,
        "ELDivExpr" => binary(BinOp::ElemLeftDiv, elem)?,
        "MPowExpr" => binary(BinOp::Pow, elem)?,
        "EPowExpr" => binary(BinOp::ElemPow, elem)?,
        "EQExpr" => binary(BinOp::Eq, elem)?,
        "NEExpr" => binary(BinOp::Ne, elem)?,
        "LTExpr" => binary(BinOp::Lt, elem)?,
        "LEExpr" => binary(BinOp::Le, elem)?,
        "GTExpr" => binary(BinOp::Gt, elem)?,
        "GEExpr" => binary(BinOp::Ge, elem)?,
        "AndExpr" => binary(BinOp::And, elem)?,
        "OrExpr" => binary(BinOp::Or, elem)?,
        "ShortCircuitAndExpr" => binary(BinOp::ScAnd, elem)?,
        "ShortCircuitOrExpr" => binary(BinOp::ScOr, elem)?,
        other => {
            return Err(FrontendError::Schema(format!(
                "unsupported expression type: <{}>",
                other
            )))
        }
    };
    Ok(Expr::new(kind))
}

fn unary(op: UnOp, elem: &XmlNode) -> Result<ExprKind, FrontendError> {
    Ok(ExprKind::Unary {
        op,
        operand: Box::new(read_expr(elem.child(0)?)?),
    })
}

fn binary(op: BinOp, elem: &XmlNode) -> Result<ExprKind, FrontendError> {
    Ok(ExprKind::Binary {
        op,
        lhs: Box::new(read_expr(elem.child(0)?)?),
        rhs: Box::new(read_expr(elem.child(1)?)?),
    })
}

fn read_rows(elem: &XmlNode) -> Result<Vec<Vec<Expr>>, FrontendError> {
    let mut rows = Vec::with_capacity(elem.children.len());
    for row_elem in &elem.children {
        if row_elem.name != "Row" {
            return Err(FrontendError::Schema(format!(
                "expected <Row> in <{}>, got <{}>",
                elem.name, row_elem.name
            )));
        }
        rows.push(
            row_elem
                .children
                .iter()
                .map(read_expr)
                .collect::<Result<Vec<_>, _>>()?,
        );
    }
    Ok(rows)
}

fn read_name(elem: &XmlNode) -> Result<Symbol, FrontendError> {
    if elem.name != "Name" {
        return Err(FrontendError::Schema(format!(
            "expected <Name>, got <{}>",
            elem.name
        )));
    }
    Ok(Symbol::intern(elem.string_attr("nameId")?))
}

/// The head of a parameterized or cell-index expression must be a plain
/// name.
fn head_symbol(elem: &XmlNode) -> Result<Symbol, FrontendError> {
    match elem.name.as_str() {
        "NameExpr" => read_name(elem.child(0)?),
        other => Err(FrontendError::Schema(format!(
            "indexing head must be a name, got <{}>",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::stmt::collect_stmt_kinds;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_simple_function() {
        let doc = r#"
<CompilationUnits>
 <FunctionList>
  <Function name="addone">
   <InputParamList><Name nameId="n"/></InputParamList>
   <OutputParamList><Name nameId="r"/></OutputParamList>
   <NestedFunctionList></NestedFunctionList>
   <StmtList>
    <AssignStmt outputSuppressed="true">
     <NameExpr><Name nameId="r"/></NameExpr>
     <PlusExpr>
      <NameExpr><Name nameId="n"/></NameExpr>
      <IntLiteralExpr value="1"/>
     </PlusExpr>
    </AssignStmt>
   </StmtList>
  </Function>
 </FunctionList>
</CompilationUnits>"#;
        let units = read_compilation_units(doc).unwrap();
        assert_eq!(units.len(), 1);
        let prog = units[0].as_prog().unwrap();
        assert_eq!(prog.name, "addone");
        assert_eq!(prog.in_params.len(), 1);
        assert_eq!(prog.out_params.len(), 1);
        assert_eq!(prog.orig_body.stmts.len(), 1);
    }

    #[test]
    fn reads_script_with_flag() {
        let doc = r#"
<CompilationUnits>
 <Script name="myscript">
  <StmtList>
   <ExprStmt outputSuppressed="false">
    <IntLiteralExpr value="42"/>
   </ExprStmt>
  </StmtList>
 </Script>
</CompilationUnits>"#;
        let units = read_compilation_units(doc).unwrap();
        let prog = units[0].as_prog().unwrap();
        assert!(prog.is_script);
        assert!(!prog.orig_body.stmts[0].suppress_output);
    }

    #[test]
    fn multi_target_assign_unwraps_matrix_lhs() {
        let doc = r#"
<CompilationUnits><FunctionList><Function name="f">
 <InputParamList/><OutputParamList/><NestedFunctionList/>
 <StmtList>
  <AssignStmt outputSuppressed="true">
   <MatrixExpr><Row>
    <NameExpr><Name nameId="a"/></NameExpr>
    <NameExpr><Name nameId="b"/></NameExpr>
   </Row></MatrixExpr>
   <ParameterizedExpr>
    <NameExpr><Name nameId="g"/></NameExpr>
    <IntLiteralExpr value="3"/>
   </ParameterizedExpr>
  </AssignStmt>
 </StmtList>
</Function></FunctionList></CompilationUnits>"#;
        let units = read_compilation_units(doc).unwrap();
        let body = &units[0].as_prog().unwrap().orig_body;
        let StmtKind::Assign { lhs, .. } = &body.stmts[0].kind else {
            panic!("expected assign");
        };
        assert_eq!(lhs.len(), 2);
    }

    #[test]
    fn elseif_chain_nests() {
        let doc = r#"
<CompilationUnits><FunctionList><Function name="f">
 <InputParamList/><OutputParamList/><NestedFunctionList/>
 <StmtList>
  <IfStmt>
   <IfBlock><IntLiteralExpr value="1"/><StmtList><BreakStmt/></StmtList></IfBlock>
   <IfBlock><IntLiteralExpr value="2"/><StmtList><ContinueStmt/></StmtList></IfBlock>
   <ElseBlock><StmtList><ReturnStmt/></StmtList></ElseBlock>
  </IfStmt>
 </StmtList>
</Function></FunctionList></CompilationUnits>"#;
        let units = read_compilation_units(doc).unwrap();
        let body = &units[0].as_prog().unwrap().orig_body;
        let kinds = collect_stmt_kinds(body);
        assert!(kinds.contains("IfElse"));
        // The outer else holds the second if.
        let StmtKind::IfElse { else_seq, .. } = &body.stmts[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(else_seq.stmts[0].kind, StmtKind::IfElse { .. }));
    }

    #[test]
    fn range_child_order_is_start_step_stop() {
        let doc = r#"
<CompilationUnits><FunctionList><Function name="f">
 <InputParamList/><OutputParamList/><NestedFunctionList/>
 <StmtList>
  <AssignStmt outputSuppressed="true">
   <NameExpr><Name nameId="x"/></NameExpr>
   <RangeExpr>
    <IntLiteralExpr value="1"/>
    <IntLiteralExpr value="2"/>
    <IntLiteralExpr value="9"/>
   </RangeExpr>
  </AssignStmt>
 </StmtList>
</Function></FunctionList></CompilationUnits>"#;
        let units = read_compilation_units(doc).unwrap();
        let body = &units[0].as_prog().unwrap().orig_body;
        let StmtKind::Assign { rhs, .. } = &body.stmts[0].kind else {
            panic!("expected assign");
        };
        let ExprKind::Range {
            start: Some(start),
            step: Some(step),
            stop: Some(stop),
        } = &rhs.kind
        else {
            panic!("expected full range");
        };
        assert_eq!(start.kind, ExprKind::IntConst(1));
        assert_eq!(step.kind, ExprKind::IntConst(2));
        assert_eq!(stop.kind, ExprKind::IntConst(9));
    }

    #[test]
    fn errorlist_surfaces_messages() {
        let doc = r#"<errorlist><error message="unexpected token"/></errorlist>"#;
        let err = read_compilation_units(doc).unwrap_err();
        match err {
            FrontendError::SourceErrors(text) => assert!(text.contains("unexpected token")),
            other => panic!("expected SourceErrors, got {:?}", other),
        }
    }

    #[test]
    fn unknown_expression_tag_is_schema_error() {
        let doc = r#"
<CompilationUnits><FunctionList><Function name="f">
 <InputParamList/><OutputParamList/><NestedFunctionList/>
 <StmtList>
  <ExprStmt outputSuppressed="true"><MysteryExpr/></ExprStmt>
 </StmtList>
</Function></FunctionList></CompilationUnits>"#;
        assert!(matches!(
            read_compilation_units(doc),
            Err(FrontendError::Schema(_))
        ));
    }
}
