//! Record - 쿼리 결과 레코드
//!
//! 한 결과 스트림의 레코드들은 같은 키 테이블을 공유합니다.

use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use super::error::{DriverError, DriverResult};
use super::types::{Node, Value};

// ============================================================================
// RecordKeys - 공유 키 테이블
// ============================================================================

/// 결과 컬럼 키 (레코드 간 공유)
#[derive(Debug, PartialEq, Eq)]
pub struct RecordKeys {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl RecordKeys {
    /// 새 키 테이블 생성
    pub fn new(names: Vec<String>) -> Arc<Self> {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        Arc::new(Self { names, index })
    }

    /// 키 목록
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 키의 위치
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// 키 개수
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// 빈 키 테이블 여부
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ============================================================================
// Record - 단일 레코드
// ============================================================================

/// 쿼리 결과 레코드
#[derive(Debug, Clone)]
pub struct Record {
    keys: Arc<RecordKeys>,
    values: Vec<Value>,
}

impl Record {
    /// 키 테이블을 공유하는 레코드 생성
    pub fn with_keys(keys: Arc<RecordKeys>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// 새 레코드 생성
    pub fn new(keys: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_keys(RecordKeys::new(keys), values)
    }

    /// 키 목록
    pub fn keys(&self) -> &[String] {
        self.keys.names()
    }

    /// 값 목록
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// 레코드 길이
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 빈 레코드 여부
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 키로 값 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys.position(key).and_then(|i| self.values.get(i))
    }

    /// 인덱스로 값 가져오기
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// 키로 타입 변환된 값 가져오기
    pub fn get_as<T>(&self, key: &str) -> DriverResult<T>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        self.get(key)
            .cloned()
            .ok_or_else(|| DriverError::type_conversion(format!("Key '{}' not found", key)))
            .and_then(T::try_from)
    }

    /// Integer 값 가져오기
    pub fn get_int(&self, key: &str) -> DriverResult<i64> {
        self.get_as(key)
    }

    /// String 값 가져오기
    pub fn get_string(&self, key: &str) -> DriverResult<String> {
        self.get_as(key)
    }

    /// Node 값 가져오기
    pub fn get_node(&self, key: &str) -> DriverResult<Node> {
        self.get_as(key)
    }

    /// Optional 값 가져오기 (Null과 없는 키는 None)
    pub fn get_optional<T>(&self, key: &str) -> DriverResult<Option<T>>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        match self.get(key) {
            Some(Value::Null) | None => Ok(None),
            Some(v) => T::try_from(v.clone()).map(Some),
        }
    }

    /// Map으로 변환
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys()
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    /// 키 존재 여부
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.position(key).is_some()
    }
}

/// 위치로 값 접근
///
/// # Panics
///
/// 범위를 벗어난 위치면 패닉. 실패를 값으로 받으려면 [`Record::get_by_index`]를 사용하세요.
impl Index<usize> for Record {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

/// 컬럼 이름으로 값 접근
///
/// # Panics
///
/// 없는 키면 패닉. 실패를 값으로 받으려면 [`Record::get`]을 사용하세요.
impl Index<&str> for Record {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        match self.get(key) {
            Some(value) => value,
            None => panic!("no such key in record: {}", key),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys()
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.keys() == other.keys() && self.values == other.values
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hero_row(keys: &Arc<RecordKeys>, name: &str, power: Option<i64>) -> Record {
        Record::with_keys(
            Arc::clone(keys),
            vec![Value::from(name), Value::from(power), Value::Boolean(power.is_some())],
        )
    }

    fn keys() -> Arc<RecordKeys> {
        RecordKeys::new(vec!["p.name".into(), "p.power".into(), "enhanced".into()])
    }

    #[test]
    fn test_lookup_by_column_and_position() {
        let keys = keys();
        let record = hero_row(&keys, "Steve Rogers", Some(9));

        assert_eq!(record.len(), 3);
        assert_eq!(record["p.name"], Value::from("Steve Rogers"));
        assert_eq!(record[1], Value::Integer(9));
        assert_eq!(record.get("p.age"), None);
        assert_eq!(record.get_by_index(7), None);
    }

    #[test]
    fn test_typed_getters() {
        let keys = keys();
        let record = hero_row(&keys, "Tony Stark", Some(7));

        assert_eq!(record.get_string("p.name").unwrap(), "Tony Stark");
        assert_eq!(record.get_int("p.power").unwrap(), 7);
        assert!(record.get_as::<bool>("enhanced").unwrap());

        let err = record.get_int("p.name").unwrap_err();
        assert!(matches!(err, DriverError::TypeConversion(_)));
        assert!(record.get_string("p.age").is_err());
    }

    #[test]
    fn test_optional_column() {
        let keys = keys();
        let record = hero_row(&keys, "Natasha Romanoff", None);

        assert_eq!(record.get_optional::<i64>("p.power").unwrap(), None);
        assert_eq!(record.get_optional::<i64>("missing").unwrap(), None);
        assert_eq!(record.get_optional::<String>("p.name").unwrap().as_deref(), Some("Natasha Romanoff"));
    }

    #[test]
    fn test_rows_of_one_stream_share_keys() {
        let keys = keys();
        let first = hero_row(&keys, "Thor Odinson", Some(10));
        let second = hero_row(&keys, "Thor Odinson", Some(10));
        let third = hero_row(&keys, "Bruce Banner", Some(10));

        assert_eq!(Arc::strong_count(&keys), 4);
        assert_eq!(keys.position("enhanced"), Some(2));
        assert_eq!(first, second);
        assert_ne!(first, third);
    }

    #[test]
    fn test_map_and_display() {
        let record = Record::new(vec!["count(p)".into()], vec![Value::Integer(0)]);

        assert_eq!(record.to_map().get("count(p)"), Some(&Value::Integer(0)));
        assert!(record.contains_key("count(p)"));
        assert_eq!(record.to_string(), "{count(p): 0}");
    }

    #[test]
    #[should_panic(expected = "no such key in record: p.age")]
    fn test_index_by_missing_key_panics() {
        let keys = keys();
        let record = hero_row(&keys, "Peter Parker", Some(4));
        let _ = &record["p.age"];
    }
}
