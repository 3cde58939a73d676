//! MongoDB implementation of the document store.

use async_trait::async_trait;
use ::mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use ::mongodb::{Client, Collection};
use tracing::debug;

use super::{
    CourseRecord, DocumentError, DocumentStore, EnrolledStudent, ModuleRecord, Result,
    UserRecord,
};

/// Collection names.
const COURSES_COLLECTION: &str = "courses";
const MODULES_COLLECTION: &str = "modules";
const USERS_COLLECTION: &str = "user";

/// MongoDB implementation of DocumentStore.
pub struct MongoDocumentStore {
    courses: Collection<Document>,
    modules: Collection<Document>,
    users: Collection<Document>,
}

impl MongoDocumentStore {
    /// Connect and select `database_name`.
    pub async fn connect(uri: &str, database_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| DocumentError::Connection(e.to_string()))?;
        Ok(Self::new(&client, database_name))
    }

    pub fn new(client: &Client, database_name: &str) -> Self {
        let database = client.database(database_name);
        Self {
            courses: database.collection(COURSES_COLLECTION),
            modules: database.collection(MODULES_COLLECTION),
            users: database.collection(USERS_COLLECTION),
        }
    }
}

/// Ids that are not valid ObjectIds cannot match any document.
fn object_id(id: &str) -> Option<ObjectId> {
    ObjectId::parse_str(id).ok()
}

fn string_field(doc: &Document, key: &str) -> String {
    doc.get_str(key).map(str::to_string).unwrap_or_default()
}

fn number_field(doc: &Document, key: &str) -> f64 {
    match doc.get(key) {
        Some(Bson::Double(v)) => *v,
        Some(Bson::Int32(v)) => f64::from(*v),
        Some(Bson::Int64(v)) => *v as f64,
        _ => 0.0,
    }
}

fn id_string(value: Option<&Bson>) -> String {
    match value {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn course_from_doc(doc: &Document) -> CourseRecord {
    let students: Vec<EnrolledStudent> = doc
        .get_array("students_id")
        .map(|items| {
            items
                .iter()
                .filter_map(Bson::as_document)
                .map(|s| EnrolledStudent {
                    id: id_string(s.get("id")),
                    name: string_field(s, "name"),
                    email: string_field(s, "email"),
                })
                .collect()
        })
        .unwrap_or_default();

    let teacher_name = doc
        .get_document("teacher_details")
        .ok()
        .and_then(|t| t.get_str("name").ok())
        .map(str::to_string);

    CourseRecord {
        id: id_string(doc.get("_id")),
        name: string_field(doc, "name"),
        price: number_field(doc, "price"),
        teacher_name,
        student_count: number_field(doc, "student_count") as u64,
        total_earned: number_field(doc, "total_earned"),
        students,
    }
}

fn module_from_doc(doc: &Document) -> ModuleRecord {
    ModuleRecord {
        id: id_string(doc.get("_id")),
        course_id: id_string(doc.get("course_id")),
        title: string_field(doc, "title"),
        description: string_field(doc, "description"),
    }
}

fn user_from_doc(doc: &Document) -> UserRecord {
    UserRecord {
        id: id_string(doc.get("_id")),
        name: string_field(doc, "name"),
        email: string_field(doc, "email"),
        courses: doc
            .get_array("courses")
            .map(|items| items.iter().map(|c| id_string(Some(c))).collect())
            .unwrap_or_default(),
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let Some(oid) = object_id(user_id) else {
            return Ok(None);
        };
        let found = self.users.find_one(doc! { "_id": oid }).await?;
        Ok(found.as_ref().map(user_from_doc))
    }

    async fn find_course(&self, course_id: &str) -> Result<Option<CourseRecord>> {
        let Some(oid) = object_id(course_id) else {
            return Ok(None);
        };
        let found = self.courses.find_one(doc! { "_id": oid }).await?;
        Ok(found.as_ref().map(course_from_doc))
    }

    async fn find_module(&self, module_id: &str) -> Result<Option<ModuleRecord>> {
        let Some(oid) = object_id(module_id) else {
            return Ok(None);
        };
        let found = self.modules.find_one(doc! { "_id": oid }).await?;
        Ok(found.as_ref().map(module_from_doc))
    }

    async fn enroll_student(
        &self,
        course_id: &str,
        student: &EnrolledStudent,
        price: f64,
    ) -> Result<bool> {
        let Some(oid) = object_id(course_id) else {
            return Ok(false);
        };

        // Single conditional update: the filter excludes courses that already
        // list the student, so concurrent or repeated deliveries apply once.
        let filter = doc! { "_id": oid, "students_id.id": { "$ne": &student.id } };
        let update = doc! {
            "$push": {
                "students_id": {
                    "id": &student.id,
                    "name": &student.name,
                    "email": &student.email,
                }
            },
            "$inc": { "student_count": 1, "total_earned": price },
        };

        let result = self.courses.update_one(filter, update).await?;
        debug!(
            course_id = %course_id,
            matched = result.matched_count,
            "Enrollment update applied"
        );
        Ok(result.modified_count == 1)
    }

    async fn add_course_to_user(&self, user_id: &str, course_id: &str) -> Result<()> {
        let Some(oid) = object_id(user_id) else {
            return Ok(());
        };
        self.users
            .update_one(
                doc! { "_id": oid },
                doc! { "$addToSet": { "courses": course_id } },
            )
            .await?;
        Ok(())
    }

    async fn remove_course_from_users(&self, course_id: &str) -> Result<u64> {
        let result = self
            .users
            .update_many(
                doc! { "courses": course_id },
                doc! { "$pull": { "courses": course_id } },
            )
            .await?;
        Ok(result.modified_count)
    }
}
