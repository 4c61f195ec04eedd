// 单条查询的缓存键：`<operation>:<id>`
pub fn point_key(operation: &str, id: &str) -> String {
    format!("{operation}:{id}")
}

// 集合查询直接使用操作名作为键
pub fn collection_key(operation: &str) -> String {
    operation.to_string()
}
