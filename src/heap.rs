use crate::{
    error::{FaultKind, VmError, VmResult},
    value::{ObjectId, Value},
};
use std::{cmp::Ordering, collections::HashMap};

/// Id handed out by the first allocation of a run.
pub const FIRST_OBJECT_ID: ObjectId = 2024;

#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    Struct(HashMap<String, Value>),
    Array(Vec<Value>),
    List(Vec<Value>),
}

impl HeapObject {
    fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Struct(_) => "struct",
            HeapObject::Array(_) => "array",
            HeapObject::List(_) => "list",
        }
    }
}

/// Append-only object arena. Object `FIRST_OBJECT_ID + n` lives at slot `n`,
/// so ids grow with allocation order across every object kind.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        let index = id.checked_sub(FIRST_OBJECT_ID)?;
        self.objects.get(usize::try_from(index).ok()?)
    }

    fn allocate(&mut self, object: HeapObject) -> ObjectId {
        let id = FIRST_OBJECT_ID + self.objects.len() as ObjectId;
        self.objects.push(object);
        id
    }

    pub fn alloc_struct(&mut self) -> ObjectId {
        self.allocate(HeapObject::Struct(HashMap::new()))
    }

    pub fn alloc_array(&mut self, length: &Value) -> VmResult<ObjectId> {
        let length = match length {
            Value::Integer(length) if *length >= 0 => *length as usize,
            Value::Integer(length) => {
                return Err(VmError::new(
                    FaultKind::Allocation,
                    format!("array length must be non-negative, got {}", length),
                ))
            }
            other => {
                return Err(VmError::new(
                    FaultKind::Allocation,
                    format!("array length must be an int, got {}", other.type_name()),
                ))
            }
        };
        Ok(self.allocate(HeapObject::Array(vec![Value::Null; length])))
    }

    pub fn alloc_list(&mut self) -> ObjectId {
        self.allocate(HeapObject::List(Vec::new()))
    }

    pub fn get_field(&self, id: &Value, name: &str) -> VmResult<Value> {
        let fields = self.struct_fields(id)?;
        fields.get(name).cloned().ok_or_else(|| {
            VmError::type_confusion(format!("struct {} has no field '{}'", id, name))
        })
    }

    pub fn set_field(&mut self, id: &Value, name: &str, value: Value) -> VmResult<()> {
        let fields = self.struct_fields_mut(id)?;
        fields.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get_index(&self, id: &Value, index: &Value) -> VmResult<Value> {
        let items = self.sequence(id)?;
        let index = checked_index(index, items.len())?;
        Ok(items[index].clone())
    }

    pub fn set_index(&mut self, id: &Value, index: &Value, value: Value) -> VmResult<()> {
        let items = self.sequence_mut(id)?;
        let index = checked_index(index, items.len())?;
        items[index] = value;
        Ok(())
    }

    /// Length of a string, or element count of an array/list, or field count
    /// of a struct.
    pub fn length(&self, value: &Value) -> VmResult<usize> {
        match value {
            Value::String(s) => Ok(s.chars().count()),
            Value::Null => Err(VmError::null("cannot take the length of null")),
            Value::Object(id) => match self.get(*id) {
                Some(HeapObject::Struct(fields)) => Ok(fields.len()),
                Some(HeapObject::Array(items)) | Some(HeapObject::List(items)) => Ok(items.len()),
                None => Err(unknown_object(*id)),
            },
            other => Err(VmError::type_confusion(format!(
                "cannot take the length of a {}",
                other.type_name()
            ))),
        }
    }

    pub fn list_append(&mut self, id: &Value, value: Value) -> VmResult<()> {
        self.list_mut(id)?.push(value);
        Ok(())
    }

    pub fn list_pop(&mut self, id: &Value) -> VmResult<Value> {
        self.list_mut(id)?
            .pop()
            .ok_or_else(|| VmError::bounds("cannot pop from an empty list"))
    }

    pub fn list_clear(&mut self, id: &Value) -> VmResult<()> {
        self.list_mut(id)?.clear();
        Ok(())
    }

    pub fn list_max(&self, id: &Value) -> VmResult<Value> {
        self.extremum(id, "max", Ordering::Greater)
    }

    pub fn list_min(&self, id: &Value) -> VmResult<Value> {
        self.extremum(id, "min", Ordering::Less)
    }

    /// Walks the list keeping the first element that beats every other one
    /// in the `wanted` direction.
    fn extremum(&self, id: &Value, name: &str, wanted: Ordering) -> VmResult<Value> {
        let items = self.list(id)?;
        let (first, rest) = items
            .split_first()
            .ok_or_else(|| VmError::bounds(format!("cannot take the {} of an empty list", name)))?;

        let mut best = first;
        for item in rest {
            let ordering = item.natural_cmp(best).ok_or_else(|| {
                if item.is_null() || best.is_null() {
                    VmError::null(format!("cannot take the {} of a list holding null", name))
                } else {
                    VmError::type_confusion(format!(
                        "cannot order {} against {}",
                        item.type_name(),
                        best.type_name()
                    ))
                }
            })?;
            if ordering == wanted {
                best = item;
            }
        }
        Ok(best.clone())
    }

    fn object_id(id: &Value, action: &str) -> VmResult<ObjectId> {
        match id {
            Value::Object(id) => Ok(*id),
            Value::Null => Err(VmError::null(format!("cannot {} on a null object", action))),
            other => Err(VmError::type_confusion(format!(
                "cannot {} on a {}",
                action,
                other.type_name()
            ))),
        }
    }

    fn object_mut(&mut self, id: ObjectId) -> VmResult<&mut HeapObject> {
        let slot = id
            .checked_sub(FIRST_OBJECT_ID)
            .and_then(|index| usize::try_from(index).ok());
        match slot {
            Some(index) if index < self.objects.len() => Ok(&mut self.objects[index]),
            _ => Err(unknown_object(id)),
        }
    }

    fn struct_fields(&self, id: &Value) -> VmResult<&HashMap<String, Value>> {
        let id = Self::object_id(id, "access a field")?;
        match self.get(id) {
            Some(HeapObject::Struct(fields)) => Ok(fields),
            Some(other) => Err(wrong_kind(id, "struct", other)),
            None => Err(unknown_object(id)),
        }
    }

    fn struct_fields_mut(&mut self, id: &Value) -> VmResult<&mut HashMap<String, Value>> {
        let id = Self::object_id(id, "set a field")?;
        match self.object_mut(id)? {
            HeapObject::Struct(fields) => Ok(fields),
            other => Err(wrong_kind(id, "struct", other)),
        }
    }

    fn sequence(&self, id: &Value) -> VmResult<&Vec<Value>> {
        let id = Self::object_id(id, "index")?;
        match self.get(id) {
            Some(HeapObject::Array(items)) | Some(HeapObject::List(items)) => Ok(items),
            Some(other) => Err(wrong_kind(id, "array", other)),
            None => Err(unknown_object(id)),
        }
    }

    fn sequence_mut(&mut self, id: &Value) -> VmResult<&mut Vec<Value>> {
        let id = Self::object_id(id, "index")?;
        match self.object_mut(id)? {
            HeapObject::Array(items) | HeapObject::List(items) => Ok(items),
            other => Err(wrong_kind(id, "array", other)),
        }
    }

    fn list(&self, id: &Value) -> VmResult<&Vec<Value>> {
        let id = Self::object_id(id, "apply a list function")?;
        match self.get(id) {
            Some(HeapObject::List(items)) => Ok(items),
            Some(other) => Err(wrong_kind(id, "list", other)),
            None => Err(unknown_object(id)),
        }
    }

    fn list_mut(&mut self, id: &Value) -> VmResult<&mut Vec<Value>> {
        let id = Self::object_id(id, "apply a list function")?;
        match self.object_mut(id)? {
            HeapObject::List(items) => Ok(items),
            other => Err(wrong_kind(id, "list", other)),
        }
    }
}

fn checked_index(index: &Value, length: usize) -> VmResult<usize> {
    match index {
        Value::Integer(i) if *i >= 0 && (*i as u64) < length as u64 => Ok(*i as usize),
        Value::Integer(i) => Err(VmError::bounds(format!(
            "index {} out of range for length {}",
            i, length
        ))),
        Value::Null => Err(VmError::null("index is null")),
        other => Err(VmError::type_confusion(format!(
            "index must be an int, got {}",
            other.type_name()
        ))),
    }
}

fn unknown_object(id: ObjectId) -> VmError {
    VmError::type_confusion(format!("object {} is not on the heap", id))
}

fn wrong_kind(id: ObjectId, expected: &str, found: &HeapObject) -> VmError {
    VmError::type_confusion(format!(
        "object {} is a {}, expected a {}",
        id,
        found.kind_name(),
        expected
    ))
}
