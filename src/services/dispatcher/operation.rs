use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::services::cache::{collection_key, point_key};

/// 操作类型：读操作可走缓存，写操作成功后失效相关缓存
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    Read { cache_key: Option<String> },
    Mutate { invalidates: Vec<String> },
}

/// 一次逻辑调用
#[derive(Debug, Clone)]
pub struct Operation {
    pub service_type: String,
    pub method: String,
    pub payload: Bytes,
    pub kind: OperationKind,
}

impl Operation {
    pub fn read(service_type: impl Into<String>, method: impl Into<String>, payload: Bytes) -> Self {
        Self {
            service_type: service_type.into(),
            method: method.into(),
            payload,
            kind: OperationKind::Read { cache_key: None },
        }
    }

    pub fn mutate(service_type: impl Into<String>, method: impl Into<String>, payload: Bytes) -> Self {
        Self {
            service_type: service_type.into(),
            method: method.into(),
            payload,
            kind: OperationKind::Mutate {
                invalidates: Vec::new(),
            },
        }
    }

    // 对写操作无效
    pub fn cached(mut self, key: impl Into<String>) -> Self {
        if let OperationKind::Read { cache_key } = &mut self.kind {
            *cache_key = Some(key.into());
        }
        self
    }

    pub fn invalidating<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let OperationKind::Mutate { invalidates } = &mut self.kind {
            invalidates.extend(keys.into_iter().map(Into::into));
        }
        self
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self.kind, OperationKind::Mutate { .. })
    }
}

/// 路由动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// 资源路由：把一类记录的增删改查映射到后端服务的方法上
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRoute {
    pub name: String,
    pub service_type: String,
    /// 完整的 gRPC 服务名，例如 `records.RecordService`
    pub grpc_service: String,
    #[serde(default)]
    pub get_method: Option<String>,
    #[serde(default)]
    pub list_method: Option<String>,
    #[serde(default)]
    pub create_method: Option<String>,
    #[serde(default)]
    pub update_method: Option<String>,
    #[serde(default)]
    pub delete_method: Option<String>,
}

impl ResourceRoute {
    pub fn records() -> Self {
        Self {
            name: "records".into(),
            service_type: "records".into(),
            grpc_service: "records.RecordService".into(),
            get_method: Some("GetRecordInfo".into()),
            list_method: Some("ListRecords".into()),
            create_method: Some("CreateRecord".into()),
            update_method: Some("UpdateRecordInfo".into()),
            delete_method: Some("DeleteRecord".into()),
        }
    }

    pub fn prescriptions() -> Self {
        Self {
            name: "prescriptions".into(),
            service_type: "prescriptions".into(),
            grpc_service: "prescription.PrescriptionManagementService".into(),
            get_method: None,
            list_method: None,
            create_method: Some("CreatePrescription".into()),
            update_method: None,
            delete_method: None,
        }
    }

    fn path(&self, method: &str) -> String {
        format!("/{}/{}", self.grpc_service, method)
    }

    /// 按动作构建操作；路由未配置该动作时返回 None
    pub fn operation(&self, action: RouteAction, id: &str, payload: Bytes) -> Option<Operation> {
        match action {
            RouteAction::Get => {
                let method = self.get_method.as_deref()?;
                Some(
                    Operation::read(&self.service_type, self.path(method), payload)
                        .cached(point_key(method, id)),
                )
            }
            RouteAction::List => {
                let method = self.list_method.as_deref()?;
                Some(
                    Operation::read(&self.service_type, self.path(method), payload)
                        .cached(collection_key(method)),
                )
            }
            RouteAction::Create => {
                let method = self.create_method.as_deref()?;
                Some(
                    Operation::mutate(&self.service_type, self.path(method), payload)
                        .invalidating(self.collection_keys()),
                )
            }
            RouteAction::Update => {
                let method = self.update_method.as_deref()?;
                Some(
                    Operation::mutate(&self.service_type, self.path(method), payload)
                        .invalidating(self.point_keys(id)),
                )
            }
            RouteAction::Delete => {
                let method = self.delete_method.as_deref()?;
                let keys: Vec<String> = self
                    .point_keys(id)
                    .into_iter()
                    .chain(self.collection_keys())
                    .collect();
                Some(Operation::mutate(&self.service_type, self.path(method), payload).invalidating(keys))
            }
        }
    }

    fn point_keys(&self, id: &str) -> Vec<String> {
        self.get_method
            .as_deref()
            .map(|method| point_key(method, id))
            .into_iter()
            .collect()
    }

    fn collection_keys(&self) -> Vec<String> {
        self.list_method
            .as_deref()
            .map(collection_key)
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalidated(op: &Operation) -> Vec<String> {
        match &op.kind {
            OperationKind::Mutate { invalidates } => invalidates.clone(),
            OperationKind::Read { .. } => panic!("expected a mutation"),
        }
    }

    #[test]
    fn test_get_uses_point_key() {
        let op = ResourceRoute::records()
            .operation(RouteAction::Get, "42", Bytes::new())
            .unwrap();
        assert_eq!(op.service_type, "records");
        assert_eq!(op.method, "/records.RecordService/GetRecordInfo");
        assert_eq!(
            op.kind,
            OperationKind::Read {
                cache_key: Some("GetRecordInfo:42".into())
            }
        );
    }

    #[test]
    fn test_list_uses_collection_key() {
        let op = ResourceRoute::records()
            .operation(RouteAction::List, "", Bytes::new())
            .unwrap();
        assert_eq!(
            op.kind,
            OperationKind::Read {
                cache_key: Some("ListRecords".into())
            }
        );
    }

    #[test]
    fn test_mutation_invalidation_sets() {
        let route = ResourceRoute::records();

        let create = route.operation(RouteAction::Create, "", Bytes::new()).unwrap();
        assert_eq!(invalidated(&create), vec!["ListRecords".to_string()]);

        // 更新不改变集合成员，只失效单条
        let update = route.operation(RouteAction::Update, "42", Bytes::new()).unwrap();
        assert_eq!(invalidated(&update), vec!["GetRecordInfo:42".to_string()]);

        let delete = route.operation(RouteAction::Delete, "42", Bytes::new()).unwrap();
        assert_eq!(
            invalidated(&delete),
            vec!["GetRecordInfo:42".to_string(), "ListRecords".to_string()]
        );
        assert!(delete.is_mutation());
    }

    #[test]
    fn test_unconfigured_action() {
        let route = ResourceRoute::prescriptions();
        assert!(route.operation(RouteAction::Get, "1", Bytes::new()).is_none());

        let create = route.operation(RouteAction::Create, "", Bytes::new()).unwrap();
        // 没有读操作时无缓存键可失效
        assert!(invalidated(&create).is_empty());
    }

    #[test]
    fn test_cached_ignored_for_mutation() {
        let op = Operation::mutate("records", "/m", Bytes::new()).cached("k");
        assert_eq!(op.kind, OperationKind::Mutate { invalidates: Vec::new() });
    }
}
