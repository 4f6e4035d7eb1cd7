//! Expression parsing and evaluation tests.

#[cfg(test)]
mod tests {
    use crate::evaluate::evaluate;
    use crate::expression::{parse_expression, BinaryOp, Expr, Literal, LogicalOp};
    use crate::reactive::Signal;
    use crate::value::{Lineage, Value};
    use serde_json::json;
    use std::sync::Arc;

    fn eval_in(source: &str, context: &Value, lineage: &Lineage) -> Value {
        let expr = parse_expression(source).unwrap();
        evaluate(&expr, context, lineage)
    }

    fn eval(source: &str, context: serde_json::Value) -> Value {
        let context = Value::from(context);
        let lineage = Lineage::root(context.clone());
        eval_in(source, &context, &lineage)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // PARSING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_precedence() {
        let expr = parse_expression("a || b && c == 1 + 2 * 3").unwrap();
        assert_eq!(expr.to_string(), "(a || (b && (c == (1 + (2 * 3)))))");

        let expr = parse_expression("1 - 2 - 3").unwrap();
        assert_eq!(expr.to_string(), "((1 - 2) - 3)");

        let expr = parse_expression("a | b ^ c & d").unwrap();
        assert_eq!(expr.to_string(), "(a | (b ^ (c & d)))");
    }

    #[test]
    fn test_longest_operator_wins() {
        let Expr::Binary { operator, .. } = parse_expression("a >>> 1").unwrap() else {
            panic!("expected a binary expression");
        };
        assert_eq!(operator, BinaryOp::UShr);

        let Expr::Binary { operator, .. } = parse_expression("a !== b").unwrap() else {
            panic!("expected a binary expression");
        };
        assert_eq!(operator, BinaryOp::StrictNe);

        assert!(matches!(
            parse_expression("a || b").unwrap(),
            Expr::Logical {
                operator: LogicalOp::Or,
                ..
            }
        ));
    }

    #[test]
    fn test_literals() {
        let number = |s: &str| match parse_expression(s).unwrap() {
            Expr::Literal {
                value: Literal::Number(n),
            } => n,
            other => panic!("not a number literal: {:?}", other),
        };
        assert_eq!(number("42"), 42.0);
        assert_eq!(number("1.5e3"), 1500.0);
        assert_eq!(number("0x1F"), 31.0);
        assert_eq!(number(".25"), 0.25);

        assert_eq!(
            parse_expression(r#"'it\'s A'"#).unwrap(),
            Expr::Literal {
                value: Literal::String("it's A".to_string())
            }
        );
        assert!(parse_expression("true").unwrap().is_literal());
        assert!(parse_expression("undefined").unwrap().is_literal());
    }

    #[test]
    fn test_relative_lookups() {
        assert_eq!(parse_expression(".").unwrap(), Expr::This);
        assert_eq!(parse_expression("this").unwrap(), Expr::This);
        assert_eq!(
            parse_expression(".name").unwrap(),
            Expr::CurrentLevel {
                name: "name".to_string()
            }
        );
        assert_eq!(
            parse_expression("../title").unwrap(),
            Expr::ParentLevel {
                name: "title".to_string()
            }
        );
        assert_eq!(parse_expression(".user.name").unwrap().to_string(), ".user.name");
    }

    #[test]
    fn test_member_and_calls() {
        assert_eq!(parse_expression("a.b[c](1, 'x')").unwrap().to_string(), "a.b[c](1, \"x\")");
        assert_eq!(parse_expression("f()").unwrap().to_string(), "f()");
    }

    #[test]
    fn test_compound_expressions() {
        let Expr::Compound { body } = parse_expression("a, b c").unwrap() else {
            panic!("expected a compound expression");
        };
        assert_eq!(body.len(), 3);
    }

    #[test]
    fn test_parse_errors() {
        for source in ["", "  ", "a +", "(a", "f(a", "'open", "1x", "a[1", "@"] {
            assert!(parse_expression(source).is_err(), "`{}` should not parse", source);
        }
        let error = parse_expression("a + )").unwrap_err();
        assert_eq!(error.offset, 4);
    }

    #[test]
    fn test_ast_serializes_with_type_tags() {
        let json = serde_json::to_value(parse_expression("a.b + 1").unwrap()).unwrap();
        assert_eq!(json["type"], "binary");
        assert_eq!(json["operator"], "+");
        assert_eq!(json["left"]["type"], "member");
        assert_eq!(json["right"]["value"]["kind"], "number");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EVALUATION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_arithmetic_and_concatenation() {
        assert_eq!(eval("1 + 2 * 3", json!({})).to_number(), 7.0);
        assert_eq!(eval("'a' + 1", json!({})).to_js_string(), "a1");
        assert_eq!(eval("n + 1", json!({"n": "4"})).to_js_string(), "41");
        assert_eq!(eval("n - 1", json!({"n": "4"})).to_number(), 3.0);
        assert_eq!(eval("7 % 4", json!({})).to_number(), 3.0);
        assert!(eval("1 / 0", json!({})).to_number().is_infinite());
    }

    #[test]
    fn test_bitwise_operators() {
        assert_eq!(eval("5 & 3", json!({})).to_number(), 1.0);
        assert_eq!(eval("5 | 3", json!({})).to_number(), 7.0);
        assert_eq!(eval("5 ^ 3", json!({})).to_number(), 6.0);
        assert_eq!(eval("~5", json!({})).to_number(), -6.0);
        assert_eq!(eval("1 << 4", json!({})).to_number(), 16.0);
        assert_eq!(eval("-16 >> 2", json!({})).to_number(), -4.0);
        assert_eq!(eval("-1 >>> 28", json!({})).to_number(), 15.0);
    }

    #[test]
    fn test_equality_and_comparison() {
        assert!(eval("n == '1'", json!({"n": 1})).truthy());
        assert!(!eval("n === '1'", json!({"n": 1})).truthy());
        assert!(eval("missing == null", json!({})).truthy());
        assert!(eval("'b' > 'a'", json!({})).truthy());
        assert!(eval("'10' < 9", json!({})).to_js_string() == "false");
        assert!(!eval("x < 1", json!({"x": "abc"})).truthy());
    }

    #[test]
    fn test_logical_operators_return_operands() {
        assert_eq!(eval("a || 'fallback'", json!({"a": ""})).to_js_string(), "fallback");
        assert_eq!(eval("a && a.b", json!({"a": {"b": 2}})).to_number(), 2.0);
        assert!(eval("a && a.b", json!({})).is_undefined());
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let context = Value::object([(
            "touch",
            Value::function(move |_, _| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Value::Bool(true)
            }),
        )]);
        let lineage = Lineage::root(context.clone());

        eval_in("false && touch()", &context, &lineage);
        eval_in("true || touch()", &context, &lineage);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        eval_in("true && touch()", &context, &lineage);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lenient_member_access() {
        assert!(eval("a.b.c.d", json!({})).is_undefined());
        assert!(eval("a.b", json!({"a": null})).is_undefined());
        assert_eq!(eval("list.length", json!({"list": [1, 2, 3]})).to_number(), 3.0);
        assert_eq!(eval("list[1]", json!({"list": [1, 2, 3]})).to_number(), 2.0);
        assert_eq!(eval("o['k' + 1]", json!({"o": {"k1": "v"}})).to_js_string(), "v");
    }

    #[test]
    fn test_calling_non_functions_yields_undefined() {
        assert!(eval("a()", json!({"a": 1})).is_undefined());
        assert!(eval("missing.fn(1)", json!({})).is_undefined());
    }

    #[test]
    fn test_method_calls_receive_receiver() {
        let greet = Value::function(|this, args| {
            let name = this.property("name").to_js_string();
            let punctuation = args.first().map(Value::to_js_string).unwrap_or_default();
            Value::from(format!("hi {}{}", name, punctuation))
        });
        let user = Value::object([("name", Value::from("ada")), ("greet", greet)]);
        let context = Value::object([("user", user)]);
        let lineage = Lineage::root(context.clone());

        assert_eq!(eval_in("user.greet('!')", &context, &lineage).to_js_string(), "hi ada!");
    }

    #[test]
    fn test_lineage_lookups() {
        let context = Value::from(json!({"title": "root"}));
        let item = Value::from(json!({"name": "first"}));
        let lineage = Lineage::root(context.clone()).push(item.clone());

        assert_eq!(eval_in(".name", &context, &lineage).to_js_string(), "first");
        assert_eq!(eval_in("../title", &context, &lineage).to_js_string(), "root");
        assert!(eval_in(".", &context, &lineage).is_same(&item));
        // Bare identifiers read the context, not the current frame.
        assert_eq!(eval_in("title", &context, &lineage).to_js_string(), "root");
        assert!(eval_in("name", &context, &lineage).is_undefined());
    }

    #[test]
    fn test_identifiers_read_through_cells() {
        let count = Signal::new(1);
        let context = Value::object([("count", Value::cell(count.clone()))]);
        let lineage = Lineage::root(context.clone());

        assert_eq!(eval_in("count + 1", &context, &lineage).to_number(), 2.0);
        count.set(41);
        assert_eq!(eval_in("count + 1", &context, &lineage).to_number(), 42.0);
    }

    #[test]
    fn test_compound_evaluates_to_first() {
        assert_eq!(eval("a, b", json!({"a": 1, "b": 2})).to_number(), 1.0);
    }
}
