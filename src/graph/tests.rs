use smallvec::smallvec;

use super::{
    ConstantData, GraphEdit, Model, NodeKind, ParamReplacement, ResultReplacement, RtValue,
};
use crate::element_type::ElementType;
use crate::layout::Layout;
use crate::ops::{BinaryOp, InferShapesError, OpType, UnaryOp};
use crate::shape;

/// Create a model `input -> Relu -> output`.
fn relu_model() -> Model {
    let mut model = Model::new();
    let input = model.add_parameter("input", ElementType::F32, shape![1, 3, 4, 4]);
    model
        .node_mut(input)
        .unwrap()
        .output_mut()
        .names
        .insert("tensor_input".to_string());
    let relu = model
        .add_op("Relu", OpType::Unary(UnaryOp::Relu), &[input])
        .unwrap();
    model.add_result("output", relu);
    model
}

#[test]
fn test_build_model() {
    let model = relu_model();
    assert_eq!(model.node_count(), 3);
    assert_eq!(model.parameters().len(), 1);
    assert_eq!(model.results().len(), 1);

    let input = model.parameters()[0];
    let relu = model.find_node("Relu").unwrap();
    assert_eq!(model.consumers(input), vec![relu]);
    assert_eq!(model.result_producer(0), Some(relu));
    assert_eq!(model.result(0).unwrap().output().shape, shape![1, 3, 4, 4]);
    assert!(model.has_alias("tensor_input"));
    assert!(!model.has_alias("input"));
    assert!(model.parameter(0).unwrap().is_parameter());
    assert!(model.result(0).unwrap().is_result());
}

#[test]
fn test_add_op_infers_output() {
    let mut model = Model::new();
    let a = model.add_parameter("a", ElementType::F32, shape![?, 3, 8, 8]);
    let b = model.add_constant(
        "b",
        ConstantData::new(ElementType::F32, &[1, 3, 1, 1], vec![1., 2., 3.]),
    );
    let sum = model
        .add_op("sum", OpType::Binary(BinaryOp::Add), &[a, b])
        .unwrap();
    let info = model.value(sum).unwrap();
    assert_eq!(info.element_type, ElementType::F32);
    assert_eq!(info.shape, shape![?, 3, 8, 8]);

    let c = model.add_parameter("c", ElementType::I32, shape![1]);
    let result = model.add_op("bad", OpType::Binary(BinaryOp::Add), &[a, c]);
    assert_eq!(result, Err(InferShapesError::IncompatibleTypes));
}

#[test]
fn test_edit_without_commit_leaves_model_unchanged() {
    let model = relu_model();
    let before = model.clone();

    let mut edit = GraphEdit::new(&model);
    let input = model.parameters()[0];
    let abs = edit.add_op(OpType::Unary(UnaryOp::Abs), &[input]).unwrap();
    assert_eq!(abs.as_usize(), model.next_id());
    assert_eq!(edit.node(abs).unwrap().name(), "Abs");
    assert_eq!(edit.staged_len(), 1);
    drop(edit);

    assert_eq!(model.node_count(), before.node_count());
    assert!(model.find_node("Abs").is_none());
}

#[test]
fn test_edit_generates_unique_names() {
    let model = relu_model();
    let mut edit = GraphEdit::new(&model);
    let input = model.parameters()[0];

    let relu = edit.add_op(OpType::Unary(UnaryOp::Relu), &[input]).unwrap();
    let relu_2 = edit.add_op(OpType::Unary(UnaryOp::Relu), &[relu]).unwrap();
    assert_eq!(edit.node(relu).unwrap().name(), "Relu_1");
    assert_eq!(edit.node(relu_2).unwrap().name(), "Relu_2");

    let scale = edit.add_constant(ConstantData::scalar(ElementType::F32, 2.));
    assert_eq!(edit.node(scale).unwrap().name(), "Constant");
    assert!(edit.staged_node_mut(input).is_none());
    assert!(edit.staged_node_mut(scale).is_some());
}

#[test]
fn test_commit_replaces_parameter() {
    let mut model = relu_model();
    let old_input = model.parameters()[0];
    let relu = model.find_node("Relu").unwrap();

    let mut edit = GraphEdit::new(&model);
    let mut info = model.value(old_input).unwrap().clone();
    info.element_type = ElementType::U8;
    let new_input = edit.add_parameter("input".to_string(), info, Default::default());
    let convert = edit
        .add_op(
            OpType::Convert {
                to: ElementType::F32,
            },
            &[new_input],
        )
        .unwrap();

    // Staged nodes which are not reachable from the new parameters or results
    // are discarded on commit.
    edit.add_op(OpType::Unary(UnaryOp::Neg), &[new_input])
        .unwrap();

    let changes = edit.finish(
        vec![ParamReplacement {
            index: 0,
            old: old_input,
            new_params: smallvec![new_input],
            output: convert,
        }],
        Vec::new(),
    );
    model.commit(changes);

    assert_eq!(model.parameters(), &[new_input]);
    assert!(model.node(old_input).is_none());
    assert_eq!(model.node(relu).unwrap().inputs(), &[convert]);
    assert!(model.find_node("Negative").is_none());
    assert_eq!(model.node_count(), 4);

    let param = model.parameter(0).unwrap();
    assert_eq!(param.name(), "input");
    assert_eq!(param.output().element_type, ElementType::U8);
    assert!(param.output().has_name("tensor_input"));
}

#[test]
fn test_commit_updates_result() {
    let mut model = relu_model();
    let relu = model.find_node("Relu").unwrap();
    let result = model.results()[0];
    model
        .node_mut(result)
        .unwrap()
        .rt_info_mut()
        .insert("some_key", RtValue::from("some_value"));

    let mut edit = GraphEdit::new(&model);
    let transpose = edit
        .add_op(
            OpType::Transpose {
                perm: smallvec![0, 2, 3, 1],
            },
            &[relu],
        )
        .unwrap();
    let changes = edit.finish(
        Vec::new(),
        vec![ResultReplacement {
            result,
            producer: transpose,
            layout: Some(Layout::parse("NHWC").unwrap()),
        }],
    );
    model.commit(changes);

    let result_node = model.result(0).unwrap();
    assert_eq!(result_node.name(), "output");
    assert_eq!(result_node.inputs(), &[transpose]);
    assert_eq!(result_node.output().shape, shape![1, 4, 4, 3]);
    assert_eq!(result_node.output().layout.as_ref().unwrap().to_string(), "NHWC");
    assert_eq!(result_node.rt_info().get_str("some_key"), Some("some_value"));
    assert!(matches!(
        model.node(transpose).unwrap().kind(),
        NodeKind::Operator(OpType::Transpose { .. })
    ));
}

#[test]
fn test_commit_splits_parameter() {
    let mut model = Model::new();
    let a = model.add_parameter("a", ElementType::U8, shape![1, 4, 4, 3]);
    let b = model.add_parameter("b", ElementType::U8, shape![1, 4, 4, 3]);
    let c = model.add_parameter("c", ElementType::U8, shape![1, 4, 4, 3]);
    for param in [a, b, c] {
        let neg = model
            .add_op(
                &format!("neg_{}", param.as_usize()),
                OpType::Unary(UnaryOp::Neg),
                &[param],
            )
            .unwrap();
        model.add_result(&format!("out_{}", param.as_usize()), neg);
    }

    let mut edit = GraphEdit::new(&model);
    let y = edit.add_parameter(
        "b/Y".to_string(),
        crate::graph::ValueInfo::new(ElementType::U8, shape![1, 4, 4, 1]),
        Default::default(),
    );
    let uv = edit.add_parameter(
        "b/UV".to_string(),
        crate::graph::ValueInfo::new(ElementType::U8, shape![1, 2, 2, 2]),
        Default::default(),
    );
    let rgb = edit
        .add_op(
            OpType::YuvToRgb {
                format: crate::color::ColorFormat::Nv12TwoPlanes,
                bgr: false,
            },
            &[y, uv],
        )
        .unwrap();
    let changes = edit.finish(
        vec![ParamReplacement {
            index: 1,
            old: b,
            new_params: smallvec![y, uv],
            output: rgb,
        }],
        Vec::new(),
    );
    model.commit(changes);

    assert_eq!(model.parameters(), &[a, y, uv, c]);
    let names: Vec<_> = model
        .parameters()
        .iter()
        .map(|id| model.node(*id).unwrap().name().to_string())
        .collect();
    assert_eq!(names, ["a", "b/Y", "b/UV", "c"]);
}
