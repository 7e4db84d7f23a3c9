/// Request/response call to a deployed function.
pub trait FunctionInvoker {
    fn invoke(&self, function_id: &str, payload: &[u8]) -> Result<Vec<u8>, String>;
}
