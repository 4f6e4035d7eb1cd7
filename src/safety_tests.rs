//! Safety Gate Tests for template invariants
//!
//! These tests verify structural invariants that must hold before a template
//! is compiled:
//! - TPL-ERR-STRUCTURE: branch placement and ordering, also for IR built by hand
//! - TPL-ERR-EXPR: expressions parse at compile time, not at render time
//! - TPL-ERR-BLOCK: unknown blocks are dropped unless strict mode is on
//! - TPL-ERR-IR: malformed IR JSON is reported, not panicked on

#[cfg(test)]
mod tests {
    use crate::template::{Template, TemplateOptions};
    use crate::test_sink::MockSink;
    use crate::validate::{
        validate_ir, BlockNode, CompilerError, ElementNode, PartialNode, SourceLocation,
        TemplateIR, TemplateNode, TextNode, ERR_EXPRESSION, ERR_IR, ERR_STRUCTURE,
        ERR_UNKNOWN_BLOCK,
    };
    use crate::visitor::collect_partial_names;

    fn mock_loc() -> SourceLocation {
        SourceLocation { line: 1, column: 1 }
    }

    fn text(value: &str) -> TemplateNode {
        TemplateNode::Text(TextNode {
            value: value.to_string(),
            location: mock_loc(),
        })
    }

    fn block(tag: &str, argument: &str, children: Vec<TemplateNode>) -> TemplateNode {
        TemplateNode::Block(BlockNode {
            tag: tag.to_string(),
            argument: argument.to_string(),
            children,
            location: mock_loc(),
        })
    }

    fn ir(nodes: Vec<TemplateNode>) -> TemplateIR {
        TemplateIR {
            raw: String::new(),
            nodes,
        }
    }

    fn compile(source: &str, options: TemplateOptions) -> Result<Template<MockSink>, CompilerError> {
        Template::from_source(source, options)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // TPL-ERR-STRUCTURE: Branch Placement
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_valid_branches_pass() {
        let tree = ir(vec![
            block(
                "if",
                "a",
                vec![text("A"), block("elif", "b", vec![text("B")]), block("else", "", vec![text("C")])],
            ),
            block("each", "items", vec![text("I"), block("else", "", vec![text("E")])]),
            block("fsm", "m", vec![block("state", "idle", vec![text("idle")])]),
        ]);
        assert!(validate_ir(&tree).is_ok());
    }

    #[test]
    fn test_else_outside_block_fails() {
        let error = validate_ir(&ir(vec![block("else", "", vec![])])).unwrap_err();
        assert_eq!(error.code, ERR_STRUCTURE);
        assert_eq!(error.error_type, "TEMPLATE_STRUCTURE_ERROR");
    }

    #[test]
    fn test_else_inside_element_inside_if_fails() {
        let element = TemplateNode::Element(ElementNode {
            tag: "div".to_string(),
            attributes: vec![],
            children: vec![block("else", "", vec![])],
            location: mock_loc(),
        });
        let error = validate_ir(&ir(vec![block("if", "a", vec![element])])).unwrap_err();
        assert_eq!(error.code, ERR_STRUCTURE);
    }

    #[test]
    fn test_elif_under_each_fails() {
        let tree = ir(vec![block("each", "xs", vec![block("elif", "y", vec![])])]);
        assert_eq!(validate_ir(&tree).unwrap_err().code, ERR_STRUCTURE);
    }

    #[test]
    fn test_else_must_be_last_and_unique() {
        let twice = ir(vec![block(
            "if",
            "a",
            vec![block("else", "", vec![]), block("else", "", vec![])],
        )]);
        assert_eq!(validate_ir(&twice).unwrap_err().code, ERR_STRUCTURE);

        let elif_after_else = ir(vec![block(
            "if",
            "a",
            vec![block("else", "", vec![]), block("elif", "b", vec![])],
        )]);
        assert_eq!(validate_ir(&elif_after_else).unwrap_err().code, ERR_STRUCTURE);
    }

    #[test]
    fn test_duplicate_else_from_source_fails_validation() {
        let error = compile("{{#if a}}x{{else}}y{{else}}z{{/if}}", TemplateOptions::default()).unwrap_err();
        assert_eq!(error.code, ERR_STRUCTURE);
    }

    #[test]
    fn test_content_after_branch_fails() {
        let tree = ir(vec![block(
            "if",
            "a",
            vec![block("else", "", vec![]), text("stray")],
        )]);
        assert_eq!(validate_ir(&tree).unwrap_err().code, ERR_STRUCTURE);

        let whitespace = ir(vec![block("if", "a", vec![block("else", "", vec![]), text("  ")])]);
        assert!(validate_ir(&whitespace).is_ok());
    }

    #[test]
    fn test_state_needs_fsm_and_name() {
        let orphan = ir(vec![block("state", "idle", vec![])]);
        assert_eq!(validate_ir(&orphan).unwrap_err().code, ERR_STRUCTURE);

        let unnamed = ir(vec![block("fsm", "m", vec![block("state", " ", vec![])])]);
        assert_eq!(validate_ir(&unnamed).unwrap_err().code, ERR_STRUCTURE);
    }

    #[test]
    fn test_partials_need_a_name() {
        let tree = ir(vec![TemplateNode::Partial(PartialNode {
            name: String::new(),
            argument: String::new(),
            location: mock_loc(),
        })]);
        assert_eq!(validate_ir(&tree).unwrap_err().code, ERR_STRUCTURE);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // TPL-ERR-EXPR / TPL-ERR-BLOCK: Compile-Time Checks
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_bad_expression_fails_compilation() {
        let error = compile("<p>\n  {{ a + }}</p>", TemplateOptions::default()).unwrap_err();
        assert_eq!(error.code, ERR_EXPRESSION);
        assert_eq!(error.line, 2);
        assert_eq!(error.context.as_deref(), Some("a +"));
    }

    #[test]
    fn test_bad_attribute_expression_fails_compilation() {
        let error = compile(r#"<p class="{{ (x }}"></p>"#, TemplateOptions::default()).unwrap_err();
        assert_eq!(error.code, ERR_EXPRESSION);
    }

    #[test]
    fn test_unknown_block_is_dropped() {
        let template = compile("<p>{{#custom x}}<b>dropped</b>{{/custom}}</p>", TemplateOptions::default()).unwrap();
        // Root and <p> only.
        assert_eq!(template.builder_count(), 2);
    }

    #[test]
    fn test_unknown_block_rejected_in_strict_mode() {
        let options = TemplateOptions {
            strict_blocks: true,
            ..TemplateOptions::default()
        };
        let error = compile("{{#custom x}}y{{/custom}}", options).unwrap_err();
        assert_eq!(error.code, ERR_UNKNOWN_BLOCK);
        assert!(!error.hints.is_empty());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // TPL-ERR-IR: JSON Boundaries
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_ir_json_round_trip_compiles() {
        let json = r#"{
            "nodes": [
                {"type": "element", "tag": "ul", "children": [
                    {"type": "block", "tag": "each", "argument": "items", "children": [
                        {"type": "element", "tag": "li", "children": [
                            {"type": "expression", "expression": ".name"}
                        ]}
                    ]}
                ]},
                {"type": "partial", "name": "footer"}
            ]
        }"#;
        let tree = TemplateIR::from_json(json).unwrap();
        assert!(validate_ir(&tree).is_ok());
        assert_eq!(collect_partial_names(&tree), vec!["footer".to_string()]);

        let template = Template::<MockSink>::from_ir(&tree, TemplateOptions::default()).unwrap();
        assert_eq!(template.partial_names(), ["footer".to_string()]);

        let reparsed = TemplateIR::from_json(&tree.to_json()).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn test_malformed_ir_json_reports_ir_error() {
        let error = TemplateIR::from_json(r#"{"nodes": [{"type": "bogus"}]}"#).unwrap_err();
        assert_eq!(error.code, ERR_IR);
        assert_eq!(error.error_type, "IR_FORMAT_ERROR");

        let error = TemplateIR::from_json("not json").unwrap_err();
        assert_eq!(error.code, ERR_IR);
        assert_eq!(error.line, 1);
    }

    #[test]
    fn test_options_json_defaults() {
        let options = TemplateOptions::from_json(r#"{"strictBlocks": true}"#).unwrap();
        assert!(options.strict_blocks);
        assert_eq!(options.container_tag, "span");

        let options = TemplateOptions::from_json(r#"{"eachEquality": "structural"}"#).unwrap();
        assert_eq!(options.each_equality, crate::template::EachEquality::Structural);

        assert_eq!(TemplateOptions::from_json("[").unwrap_err().code, ERR_IR);
    }

    #[test]
    fn test_error_display_carries_code_and_position() {
        let error = CompilerError::new(ERR_STRUCTURE, "boom", 3, 7);
        assert_eq!(error.to_string(), "TPL-ERR-STRUCTURE: boom (line 3, column 7)");
        assert!(!error.guarantee.is_empty());
    }
}
