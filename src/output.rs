//! Destination of `print`: stdout, or a shared buffer tests can inspect.

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub enum Output {
    #[default]
    Stdout,
    Buffer(Rc<RefCell<String>>),
    Silent,
}

impl Output {
    pub fn buffer() -> Self {
        Output::Buffer(Rc::new(RefCell::new(String::new())))
    }

    pub fn println(&self, message: &str) {
        match self {
            Output::Stdout => println!("{}", message),
            Output::Buffer(buffer) => {
                let mut buffer = buffer.borrow_mut();
                buffer.push_str(message);
                buffer.push('\n');
            }
            Output::Silent => {}
        }
    }

    /// Captured text; empty for destinations that do not capture.
    pub fn captured(&self) -> String {
        match self {
            Output::Buffer(buffer) => buffer.borrow().clone(),
            Output::Stdout | Output::Silent => String::new(),
        }
    }

    pub fn clear(&self) {
        if let Output::Buffer(buffer) = self {
            buffer.borrow_mut().clear();
        }
    }
}
