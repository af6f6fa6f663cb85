//! Entries registered at startup.

use crate::error::{Code, Diagnostic, RegistryError};
use crate::evaluator::{adopt, Evaluator};
use crate::registry::{Entry, Registry, ARITHMETIC_ENTRY, COMPARISON_ENTRY};
use crate::scope::Container;
use crate::value::{Object, Payload, TYPE_STRUCT};

pub fn register_defaults(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(Entry::operator(ARITHMETIC_ENTRY, 3, arithmetic))?;
    registry.register(Entry::operator(COMPARISON_ENTRY, 3, comparison))?;
    registry.register(Entry::variadic("print", print))?;
    registry.register(Entry::native("type", 1, type_of))?;
    registry.register(Entry::variadic("struct", make_struct))?;
    registry.register(Entry::variadic("array", make_array))?;
    registry.register(Entry::native("at", 2, at))?;
    Ok(())
}

fn temporary(payload: Payload) -> Diagnostic {
    let object = Object::new(payload);
    object.set_delivering();
    Diagnostic::with_object(object)
}

fn operands(args: &[Object]) -> Result<(Payload, Payload, String), Diagnostic> {
    let left = args[0].payload()?;
    let right = args[1].payload()?;
    let symbol = args[2].cast::<String>()?;
    Ok((left, right, symbol))
}

fn mismatch(symbol: &str, left: &Payload, right: &Payload) -> Diagnostic {
    Diagnostic::fatal(
        Code::TypeMismatch,
        format!(
            "Cannot apply '{}' to {} and {}",
            symbol,
            left.type_name(),
            right.type_name()
        ),
    )
}

fn as_number(payload: &Payload) -> Option<f64> {
    match payload {
        Payload::Int(n) => Some(*n as f64),
        Payload::Double(n) => Some(*n),
        _ => None,
    }
}

/// `binexp`: `+ - * /` over numbers, `+` over strings and arrays.
fn arithmetic(_: &mut Evaluator, args: Vec<Object>) -> Diagnostic {
    let (left, right, symbol) = match operands(&args) {
        Ok(operands) => operands,
        Err(diagnostic) => return diagnostic,
    };

    let result = match (&left, &right, symbol.as_str()) {
        (Payload::Int(l), Payload::Int(r), op) => {
            let value = match op {
                "+" => l.checked_add(*r),
                "-" => l.checked_sub(*r),
                "*" => l.checked_mul(*r),
                "/" if *r == 0 => {
                    return Diagnostic::fatal(Code::IllegalParam, "Division by zero")
                }
                "/" => l.checked_div(*r),
                _ => return mismatch(op, &left, &right),
            };
            match value {
                Some(n) => Payload::Int(n),
                None => {
                    return Diagnostic::fatal(
                        Code::Overflow,
                        format!("Integer overflow in {} {} {}", l, op, r),
                    )
                }
            }
        }
        (Payload::String(l), r, "+") => Payload::String(format!("{}{}", l, r)),
        (l, Payload::String(r), "+") => Payload::String(format!("{}{}", l, r)),
        (Payload::Array(l), Payload::Array(r), "+") => Payload::Array(
            l.iter().chain(r.iter()).map(Object::duplicate).collect(),
        ),
        (l, r, op) => match (as_number(l), as_number(r)) {
            (Some(l), Some(r)) => match op {
                "+" => Payload::Double(l + r),
                "-" => Payload::Double(l - r),
                "*" => Payload::Double(l * r),
                "/" if r == 0.0 => {
                    return Diagnostic::fatal(Code::IllegalParam, "Division by zero")
                }
                "/" => Payload::Double(l / r),
                _ => return mismatch(op, &left, &right),
            },
            _ => return mismatch(op, &left, &right),
        },
    };
    temporary(result)
}

fn equals(left: &Payload, right: &Payload) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// `logic`: equality over any values, ordering over numbers and strings.
fn comparison(_: &mut Evaluator, args: Vec<Object>) -> Diagnostic {
    let (left, right, symbol) = match operands(&args) {
        Ok(operands) => operands,
        Err(diagnostic) => return diagnostic,
    };

    let ordering = match (&left, &right) {
        (Payload::String(l), Payload::String(r)) => Some(l.cmp(r)),
        (l, r) => match (as_number(l), as_number(r)) {
            (Some(l), Some(r)) => l.partial_cmp(&r),
            _ => None,
        },
    };

    let result = match (symbol.as_str(), ordering) {
        ("==", _) => equals(&left, &right),
        ("!=", _) => !equals(&left, &right),
        ("<", Some(ordering)) => ordering.is_lt(),
        ("<=", Some(ordering)) => ordering.is_le(),
        (">", Some(ordering)) => ordering.is_gt(),
        (">=", Some(ordering)) => ordering.is_ge(),
        (op, _) => return mismatch(op, &left, &right),
    };
    temporary(Payload::Bool(result))
}

fn print(evaluator: &mut Evaluator, args: Vec<Object>) -> Diagnostic {
    let text: Vec<String> = args.iter().map(Object::to_string).collect();
    evaluator.output().println(&text.join(" "));
    Diagnostic::nothing()
}

fn type_of(_: &mut Evaluator, args: Vec<Object>) -> Diagnostic {
    match args[0].deref() {
        Ok(target) => temporary(Payload::String(target.type_id())),
        Err(error) => error.into(),
    }
}

/// `struct()` or `struct("Name")`: a fresh struct with no members.
fn make_struct(_: &mut Evaluator, args: Vec<Object>) -> Diagnostic {
    let type_id = match args.as_slice() {
        [] => TYPE_STRUCT.to_string(),
        [name] => match name.cast::<String>() {
            Ok(name) => name,
            Err(error) => return error.into(),
        },
        _ => {
            return Diagnostic::fatal(
                Code::IllegalArgs,
                format!("Parameter count doesn't match - struct (expected 0 or 1, got {})", args.len()),
            )
        }
    };
    let object = Container::new().into_object(type_id);
    object.set_delivering();
    Diagnostic::with_object(object)
}

fn make_array(_: &mut Evaluator, args: Vec<Object>) -> Diagnostic {
    let items: Result<Vec<Object>, _> = args.iter().map(adopt).collect();
    match items {
        Ok(items) => temporary(Payload::Array(items)),
        Err(error) => error.into(),
    }
}

/// `at(container, index)`: element of an array or character of a string.
fn at(_: &mut Evaluator, args: Vec<Object>) -> Diagnostic {
    let index = match args[1].cast::<i64>() {
        Ok(index) => index,
        Err(error) => return error.into(),
    };
    let out_of_range = || {
        Diagnostic::fatal(
            Code::IllegalParam,
            format!("illegal index or size: {}", index),
        )
    };
    let Ok(index) = usize::try_from(index) else {
        return out_of_range();
    };

    let element = args[0].with_payload(|payload| match payload {
        Payload::Array(items) => items.get(index).cloned().ok_or_else(out_of_range),
        Payload::String(text) => text
            .chars()
            .nth(index)
            .map(|c| Object::string(c.to_string()))
            .ok_or_else(out_of_range),
        other => Err(Diagnostic::fatal(
            Code::TypeMismatch,
            format!("Cannot index into {}", other.type_name()),
        )),
    });

    match element {
        Ok(Ok(object)) => Diagnostic::with_object(object),
        Ok(Err(diagnostic)) => diagnostic,
        Err(error) => error.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Delivery;

    fn call(name: &str, args: Vec<Object>) -> Diagnostic {
        let mut evaluator = Evaluator::new();
        let entry = evaluator.registry().resolve(name).expect("entry");
        entry.invoke(&mut evaluator, args)
    }

    fn binary(left: Object, symbol: &str, right: Object) -> Diagnostic {
        call(symbol, vec![left, right, Object::string(symbol)])
    }

    fn value(diagnostic: Diagnostic) -> Payload {
        assert!(diagnostic.is_success(), "{}", diagnostic);
        diagnostic.value.expect("value").payload().expect("payload")
    }

    #[test]
    fn integer_arithmetic() {
        assert_eq!(value(binary(Object::int(7), "+", Object::int(5))), Payload::Int(12));
        assert_eq!(value(binary(Object::int(7), "-", Object::int(5))), Payload::Int(2));
        assert_eq!(value(binary(Object::int(7), "*", Object::int(5))), Payload::Int(35));
        assert_eq!(value(binary(Object::int(7), "/", Object::int(2))), Payload::Int(3));
    }

    #[test]
    fn mixed_numbers_promote_to_double() {
        assert_eq!(value(binary(Object::int(1), "+", Object::double(0.5))), Payload::Double(1.5));
        assert_eq!(value(binary(Object::double(3.0), "/", Object::int(2))), Payload::Double(1.5));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            value(binary(Object::string("n = "), "+", Object::int(4))),
            Payload::String("n = 4".to_string())
        );
    }

    #[test]
    fn arithmetic_failures() {
        let zero = binary(Object::int(1), "/", Object::int(0));
        assert_eq!(zero.code, Code::IllegalParam);
        assert!(zero.is_fatal());

        let overflow = binary(Object::int(i64::MAX), "+", Object::int(1));
        assert_eq!(overflow.code, Code::Overflow);

        let mismatched = binary(Object::boolean(true), "*", Object::int(1));
        assert_eq!(mismatched.code, Code::TypeMismatch);
    }

    #[test]
    fn comparisons() {
        assert_eq!(value(binary(Object::int(2), "==", Object::double(2.0))), Payload::Bool(true));
        assert_eq!(value(binary(Object::int(2), "!=", Object::int(3))), Payload::Bool(true));
        assert_eq!(value(binary(Object::string("a"), "<", Object::string("b"))), Payload::Bool(true));
        assert_eq!(value(binary(Object::int(3), ">=", Object::int(4))), Payload::Bool(false));
        assert_eq!(value(binary(Object::null(), "==", Object::null())), Payload::Bool(true));
        assert_eq!(
            binary(Object::boolean(true), "<", Object::int(1)).code,
            Code::TypeMismatch
        );
    }

    #[test]
    fn results_are_temporaries() {
        let result = binary(Object::int(1), "+", Object::int(2)).value.expect("value");
        let (payload, delivery) = result.deliver().expect("deliver");
        assert_eq!(payload, Payload::Int(3));
        assert_eq!(delivery, Delivery::Move);
    }

    #[test]
    fn at_indexes_arrays_and_strings() {
        let array = Object::new(Payload::Array(vec![Object::int(10), Object::int(20)]));
        assert_eq!(value(call("at", vec![array.clone(), Object::int(1)])), Payload::Int(20));
        assert_eq!(
            value(call("at", vec![Object::string("abc"), Object::int(2)])),
            Payload::String("c".to_string())
        );

        for index in [2, -1] {
            let result = call("at", vec![array.clone(), Object::int(index)]);
            assert!(result.is_fatal());
            assert_eq!(result.code, Code::IllegalParam);
            assert_eq!(result.code.as_str(), "illegal index or size");
        }
        assert_eq!(call("at", vec![array]).code, Code::IllegalArgs);
    }

    #[test]
    fn struct_and_type() {
        let point = value(call("struct", vec![Object::string("Point")]));
        assert!(matches!(point, Payload::Struct(_)));

        let object = call("struct", vec![Object::string("Point")]).value.expect("value");
        assert_eq!(value(call("type", vec![object])), Payload::String("Point".to_string()));
        assert_eq!(
            value(call("type", vec![Object::double(1.0)])),
            Payload::String("double".to_string())
        );
    }

    #[test]
    fn array_copies_its_arguments() {
        let source = Object::int(1);
        let array = value(call("array", vec![source.clone(), Object::string("x")]));
        let Payload::Array(items) = array else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 2);
        assert!(!items[0].ptr_eq(&source));
        assert_eq!(items[0].payload(), Ok(Payload::Int(1)));
    }

    #[test]
    fn print_writes_to_the_output() {
        let mut evaluator = Evaluator::new().with_output(crate::output::Output::buffer());
        let entry = evaluator.registry().resolve("print").expect("print");
        let result = entry.invoke(&mut evaluator, vec![Object::string("a"), Object::int(1)]);
        assert_eq!(result.code, Code::Nothing);
        assert_eq!(evaluator.output().captured(), "a 1\n");
    }
}
