pub const DATA: &str = "u/data";
