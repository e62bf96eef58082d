//! Source-to-output tests driving the whole pipeline: parse, check, compile,
//! run. Each program is a minimal native registry away from what a host
//! embedding this crate would actually wire up for `import "stdio"` and
//! `import "stdconv"`.

use std::cell::RefCell;

use pretty_assertions::assert_eq;
use quartz::native::{NativeContext, NativeError, NativeId, NativeRegistry, NativeSignature};
use quartz::symbol::SymbolTable;
use quartz::tracer::NoopTracer;
use quartz::type_pool::TypePool;
use quartz::value::Value;
use quartz::vm::{Vm, VmConfig};
use quartz::{bytecode::Compiler, compile_front_end, FileId};

/// Stands in for a host's `stdio`/`stdconv` bindings: just enough of
/// `println` and `ntos` to drive a program to observable output, captured
/// instead of written to a real stdout.
struct TestNatives {
    output: RefCell<String>,
}

impl TestNatives {
    fn new() -> Self {
        Self { output: RefCell::new(String::new()) }
    }
}

const PRINTLN: NativeId = NativeId(0);
const NTOS: NativeId = NativeId(1);

impl NativeRegistry for TestNatives {
    fn lookup(&self, name: &str) -> Option<NativeId> {
        match name {
            "println" => Some(PRINTLN),
            "ntos" => Some(NTOS),
            _ => None,
        }
    }

    fn signature(&self, id: NativeId, types: &TypePool) -> NativeSignature {
        match id {
            PRINTLN => NativeSignature { params: vec![types.string()], return_type: types.void() },
            NTOS => NativeSignature { params: vec![types.number()], return_type: types.string() },
            _ => unreachable!("unregistered native id"),
        }
    }

    fn call(&self, id: NativeId, args: &[Value], ctx: &mut dyn NativeContext) -> Result<Value, NativeError> {
        match id {
            PRINTLN => {
                let text = ctx.resolve_string(args[0]).ok_or_else(|| NativeError::Failed("println expects a String".into()))?;
                let mut out = self.output.borrow_mut();
                out.push_str(&text);
                out.push('\n');
                Ok(Value::Nil)
            }
            NTOS => {
                let n = match args[0] {
                    Value::Number(n) => n,
                    _ => return Err(NativeError::Failed("ntos expects a Number".into())),
                };
                let text = if n.fract() == 0.0 { format!("{n}") } else { n.to_string() };
                Ok(ctx.make_string(&text))
            }
            _ => unreachable!("unregistered native id"),
        }
    }
}

/// Runs `source` end to end and returns everything `println` collected.
/// Panics (failing the test) on any front-end diagnostic or runtime error,
/// since every fixture here is meant to compile and run cleanly.
fn run(source: &str) -> String {
    let mut symbols = SymbolTable::new();
    let mut types = TypePool::new();
    let (module, diagnostics) = compile_front_end(source, FileId::new("test.qz"), &mut symbols, &mut types, None);
    assert!(!diagnostics.has_errors(), "unexpected diagnostics for {source:?}: {:?}", diagnostics.into_vec());

    let code = Compiler::new(&mut symbols, &types).compile_module(&module);

    let natives = TestNatives::new();
    let mut vm = Vm::new(&natives, &types, NoopTracer, VmConfig::default());
    vm.bind_native("println", PRINTLN);
    vm.bind_native("ntos", NTOS);
    vm.interpret(code).expect("program should run without a runtime error");

    natives.output.into_inner()
}

#[test]
fn prints_a_string_literal() {
    let output = run(r#"import "stdio";
        import "stdconv"; println("hi");"#);
    assert_eq!(output, "hi\n");
}

#[test]
fn evaluates_arithmetic_precedence_before_printing() {
    let output = run(
        r#"
        import "stdio";
        import "stdconv";
        var a: Number = 2 + 3 * 4;
        println(ntos(a));
        "#,
    );
    assert_eq!(output, "14\n");
}

#[test]
fn closure_upvalue_survives_the_enclosing_call_returning() {
    let output = run(
        r#"
        import "stdio";
        import "stdconv";
        fn make_counter(): (): Number {
            var x: Number = 1;
            fn inner(): Number {
                x = x + 1;
                return x;
            }
            return inner;
        }
        var counter: (): Number = make_counter();
        println(ntos(counter()));
        println(ntos(counter()));
        "#,
    );
    assert_eq!(output, "2\n3\n");
}

#[test]
fn class_field_set_in_init_is_read_back_through_a_method() {
    let output = run(
        r#"
        import "stdio";
        import "stdconv";
        class Point {
            pub var n: Number;
            pub fn init(v: Number) {
                self.n = v;
            }
            pub fn get(): Number {
                return self.n;
            }
        }
        var p: Point = new Point(7);
        println(ntos(p.get()));
        "#,
    );
    assert_eq!(output, "7\n");
}

#[test]
fn array_push_then_length_reflects_the_new_element() {
    let output = run(
        r#"
        import "stdio";
        import "stdconv";
        var xs: []Number = []Number{1, 2, 3};
        xs.push(4);
        println(ntos(xs.length()));
        "#,
    );
    assert_eq!(output, "4\n");
}

#[test]
fn for_loop_prints_each_iteration_variable() {
    let output = run(
        r#"
        import "stdio";
        import "stdconv";
        for (var i: Number = 0; i < 3; i = i + 1) {
            println(ntos(i));
        }
        "#,
    );
    assert_eq!(output, "0\n1\n2\n");
}

#[test]
fn and_evaluates_the_right_operand_even_when_the_left_is_false() {
    let output = run(
        r#"
        import "stdio";
        fn left(): Bool {
            println("L");
            return false;
        }
        fn right(): Bool {
            println("R");
            return true;
        }
        var r: Bool = left() && right();
        "#,
    );
    assert_eq!(output, "L\nR\n");
}

#[test]
fn or_evaluates_the_right_operand_even_when_the_left_is_true() {
    let output = run(
        r#"
        import "stdio";
        fn left(): Bool {
            println("L");
            return true;
        }
        fn right(): Bool {
            println("R");
            return true;
        }
        var r: Bool = left() || right();
        "#,
    );
    assert_eq!(output, "L\nR\n");
}

#[test]
fn cast_to_bool_coerces_a_truthy_number_at_runtime() {
    let output = run(
        r#"
        import "stdio";
        var b: Bool = cast<Bool>(5);
        if (b) {
            println("true");
        } else {
            println("false");
        }
        "#,
    );
    assert_eq!(output, "true\n");
}

#[test]
fn illegal_cast_is_a_compile_time_error() {
    let mut symbols = SymbolTable::new();
    let mut types = TypePool::new();
    let (_, diagnostics) = compile_front_end(
        r#"
        import "stdio";
        var s: String = cast<String>(5);
        "#,
        FileId::new("test.qz"),
        &mut symbols,
        &mut types,
        None,
    );
    assert!(diagnostics.has_errors(), "cast<String>(5) should not type-check");
}
