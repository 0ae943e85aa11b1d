//! Schema fixtures shared by unit tests across the crate.

use serde_json::{json, Map, Value};

use super::documents::ApiSchemaDocuments;

fn reference(resource_name: &str, required: bool, pairs: &[(&str, &str)]) -> Value {
    reference_in("Ed-Fi", resource_name, required, pairs)
}

fn reference_in(project_name: &str, resource_name: &str, required: bool, pairs: &[(&str, &str)]) -> Value {
    let paths: Vec<Value> = pairs
        .iter()
        .map(|(identity, reference)| {
            json!({ "identityJsonPath": identity, "referenceJsonPath": reference })
        })
        .collect();
    json!({
        "isReference": true,
        "isDescriptor": false,
        "isRequired": required,
        "projectName": project_name,
        "resourceName": resource_name,
        "referenceJsonPaths": paths
    })
}

fn descriptor(resource_name: &str, path: &str) -> Value {
    json!({
        "isReference": true,
        "isDescriptor": true,
        "isRequired": false,
        "projectName": "Ed-Fi",
        "resourceName": resource_name,
        "path": path
    })
}

fn resource(resource_name: &str, identity: &[&str], mappings: &[(&str, Value)]) -> Value {
    let mut mapping = Map::new();
    for (name, path) in mappings {
        mapping.insert(name.to_string(), path.clone());
    }
    json!({
        "resourceName": resource_name,
        "isDescriptor": false,
        "isSchoolYearEnumeration": false,
        "isSubclass": false,
        "allowIdentityUpdates": false,
        "identityJsonPaths": identity,
        "documentPathsMapping": Value::Object(mapping),
        "securableElements": {}
    })
}

fn with(mut value: Value, key: &str, field: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.insert(key.to_string(), field);
    }
    value
}

const COURSE_OFFERING_IDENTITY: [&str; 4] = [
    "$.localCourseCode",
    "$.schoolReference.schoolId",
    "$.sessionReference.schoolYear",
    "$.sessionReference.sessionName",
];

fn course_offering_reference(required: bool) -> Value {
    reference(
        "CourseOffering",
        required,
        &[
            ("$.localCourseCode", "$.courseOfferingReference.localCourseCode"),
            ("$.schoolReference.schoolId", "$.courseOfferingReference.schoolId"),
            ("$.sessionReference.schoolYear", "$.courseOfferingReference.schoolYear"),
            ("$.sessionReference.sessionName", "$.courseOfferingReference.sessionName"),
        ],
    )
}

fn section_reference(required: bool) -> Value {
    reference(
        "Section",
        required,
        &[
            ("$.sectionIdentifier", "$.sectionReference.sectionIdentifier"),
            ("$.courseOfferingReference.localCourseCode", "$.sectionReference.localCourseCode"),
            ("$.courseOfferingReference.schoolId", "$.sectionReference.schoolId"),
            ("$.courseOfferingReference.schoolYear", "$.sectionReference.schoolYear"),
            ("$.courseOfferingReference.sessionName", "$.sectionReference.sessionName"),
        ],
    )
}

fn ed_org_reference(required: bool) -> Value {
    reference(
        "EducationOrganization",
        required,
        &[(
            "$.educationOrganizationId",
            "$.educationOrganizationReference.educationOrganizationId",
        )],
    )
}

fn school_reference(required: bool) -> Value {
    reference("School", required, &[("$.schoolId", "$.schoolReference.schoolId")])
}

fn student_reference(required: bool) -> Value {
    reference(
        "Student",
        required,
        &[("$.studentUniqueId", "$.studentReference.studentUniqueId")],
    )
}

fn staff_reference(required: bool) -> Value {
    reference(
        "Staff",
        required,
        &[("$.staffUniqueId", "$.staffReference.staffUniqueId")],
    )
}

fn subclass(value: Value, identity_path: &str) -> Value {
    let value = with(value, "isSubclass", json!(true));
    let value = with(value, "superclassResourceName", json!("EducationOrganization"));
    let value = with(value, "superclassProjectName", json!("Ed-Fi"));
    let value = with(value, "superclassIdentityJsonPath", json!("$.educationOrganizationId"));
    with(value, "identityJsonPaths", json!([identity_path]))
}

/// The core project schema document.
pub fn core_schema_json() -> Value {
    let mut resources = Map::new();

    resources.insert(
        "schoolYearTypes".into(),
        with(
            resource("SchoolYearType", &["$.schoolYear"], &[]),
            "isSchoolYearEnumeration",
            json!(true),
        ),
    );
    resources.insert(
        "gradeLevelDescriptors".into(),
        with(
            with(
                resource("GradeLevelDescriptor", &["$.namespace", "$.codeValue"], &[]),
                "isDescriptor",
                json!(true),
            ),
            "securableElements",
            json!({ "Namespace": ["$.namespace"] }),
        ),
    );
    resources.insert(
        "localEducationAgencies".into(),
        subclass(
            resource("LocalEducationAgency", &[], &[]),
            "$.localEducationAgencyId",
        ),
    );
    resources.insert(
        "schools".into(),
        subclass(
            resource(
                "School",
                &[],
                &[
                    (
                        "LocalEducationAgency",
                        reference(
                            "LocalEducationAgency",
                            false,
                            &[(
                                "$.localEducationAgencyId",
                                "$.localEducationAgencyReference.localEducationAgencyId",
                            )],
                        ),
                    ),
                    (
                        "GradeLevelDescriptor",
                        descriptor("GradeLevelDescriptor", "$.gradeLevels[*].gradeLevelDescriptor"),
                    ),
                ],
            ),
            "$.schoolId",
        ),
    );
    resources.insert(
        "students".into(),
        resource("Student", &["$.studentUniqueId"], &[]),
    );
    resources.insert(
        "studentSchoolAssociations".into(),
        with(
            resource(
                "StudentSchoolAssociation",
                &[
                    "$.entryDate",
                    "$.schoolReference.schoolId",
                    "$.studentReference.studentUniqueId",
                ],
                &[
                    ("Student", student_reference(true)),
                    ("School", school_reference(true)),
                    (
                        "SchoolYearType",
                        reference(
                            "SchoolYearType",
                            false,
                            &[("$.schoolYear", "$.schoolYearTypeReference.schoolYear")],
                        ),
                    ),
                ],
            ),
            "securableElements",
            json!({
                "EducationOrganization": [{ "metaEdName": "SchoolId", "jsonPath": "$.schoolReference.schoolId" }],
                "Student": ["$.studentReference.studentUniqueId"]
            }),
        ),
    );
    resources.insert(
        "courses".into(),
        with(
            resource(
                "Course",
                &[
                    "$.courseCode",
                    "$.educationOrganizationReference.educationOrganizationId",
                ],
                &[("EducationOrganization", ed_org_reference(true))],
            ),
            "securableElements",
            json!({
                "EducationOrganization": [{
                    "metaEdName": "EducationOrganizationId",
                    "jsonPath": "$.educationOrganizationReference.educationOrganizationId"
                }]
            }),
        ),
    );
    resources.insert(
        "sessions".into(),
        with(
            resource(
                "Session",
                &[
                    "$.schoolReference.schoolId",
                    "$.schoolYearTypeReference.schoolYear",
                    "$.sessionName",
                ],
                &[
                    ("School", school_reference(true)),
                    (
                        "SchoolYearType",
                        reference(
                            "SchoolYearType",
                            true,
                            &[("$.schoolYear", "$.schoolYearTypeReference.schoolYear")],
                        ),
                    ),
                ],
            ),
            "allowIdentityUpdates",
            json!(true),
        ),
    );
    resources.insert(
        "courseOfferings".into(),
        with(
            resource(
                "CourseOffering",
                &COURSE_OFFERING_IDENTITY,
                &[
                    (
                        "Course",
                        reference(
                            "Course",
                            true,
                            &[
                                ("$.courseCode", "$.courseReference.courseCode"),
                                (
                                    "$.educationOrganizationReference.educationOrganizationId",
                                    "$.courseReference.educationOrganizationId",
                                ),
                            ],
                        ),
                    ),
                    ("School", school_reference(true)),
                    (
                        "Session",
                        reference(
                            "Session",
                            true,
                            &[
                                ("$.schoolReference.schoolId", "$.sessionReference.schoolId"),
                                (
                                    "$.schoolYearTypeReference.schoolYear",
                                    "$.sessionReference.schoolYear",
                                ),
                                ("$.sessionName", "$.sessionReference.sessionName"),
                            ],
                        ),
                    ),
                ],
            ),
            "allowIdentityUpdates",
            json!(true),
        ),
    );
    resources.insert(
        "classPeriods".into(),
        with(
            resource(
                "ClassPeriod",
                &["$.classPeriodName", "$.schoolReference.schoolId"],
                &[("School", school_reference(true))],
            ),
            "allowIdentityUpdates",
            json!(true),
        ),
    );
    resources.insert(
        "sections".into(),
        with(
            resource(
                "Section",
                &[
                    "$.sectionIdentifier",
                    "$.courseOfferingReference.localCourseCode",
                    "$.courseOfferingReference.schoolId",
                    "$.courseOfferingReference.schoolYear",
                    "$.courseOfferingReference.sessionName",
                ],
                &[
                    ("CourseOffering", course_offering_reference(true)),
                    (
                        "ClassPeriod",
                        reference(
                            "ClassPeriod",
                            false,
                            &[
                                (
                                    "$.classPeriodName",
                                    "$.classPeriods[*].classPeriodReference.classPeriodName",
                                ),
                                (
                                    "$.schoolReference.schoolId",
                                    "$.classPeriods[*].classPeriodReference.schoolId",
                                ),
                            ],
                        ),
                    ),
                ],
            ),
            "allowIdentityUpdates",
            json!(true),
        ),
    );
    resources.insert(
        "studentSectionAssociations".into(),
        with(
            resource(
                "StudentSectionAssociation",
                &[
                    "$.beginDate",
                    "$.sectionReference.localCourseCode",
                    "$.sectionReference.schoolId",
                    "$.sectionReference.schoolYear",
                    "$.sectionReference.sectionIdentifier",
                    "$.sectionReference.sessionName",
                    "$.studentReference.studentUniqueId",
                ],
                &[
                    ("Section", section_reference(true)),
                    ("Student", student_reference(true)),
                ],
            ),
            "securableElements",
            json!({ "Student": ["$.studentReference.studentUniqueId"] }),
        ),
    );
    resources.insert(
        "staffs".into(),
        resource("Staff", &["$.staffUniqueId"], &[]),
    );
    resources.insert(
        "staffEducationOrganizationEmploymentAssociations".into(),
        with(
            resource(
                "StaffEducationOrganizationEmploymentAssociation",
                &[
                    "$.educationOrganizationReference.educationOrganizationId",
                    "$.hireDate",
                    "$.staffReference.staffUniqueId",
                ],
                &[
                    ("EducationOrganization", ed_org_reference(true)),
                    ("Staff", staff_reference(true)),
                ],
            ),
            "securableElements",
            json!({
                "EducationOrganization": [{
                    "metaEdName": "EducationOrganizationId",
                    "jsonPath": "$.educationOrganizationReference.educationOrganizationId"
                }],
                "Staff": ["$.staffReference.staffUniqueId"]
            }),
        ),
    );
    resources.insert(
        "staffEducationOrganizationAssignmentAssociations".into(),
        with(
            resource(
                "StaffEducationOrganizationAssignmentAssociation",
                &[
                    "$.beginDate",
                    "$.educationOrganizationReference.educationOrganizationId",
                    "$.staffReference.staffUniqueId",
                ],
                &[
                    ("EducationOrganization", ed_org_reference(true)),
                    ("Staff", staff_reference(true)),
                ],
            ),
            "securableElements",
            json!({
                "EducationOrganization": [{
                    "metaEdName": "EducationOrganizationId",
                    "jsonPath": "$.educationOrganizationReference.educationOrganizationId"
                }],
                "Staff": ["$.staffReference.staffUniqueId"]
            }),
        ),
    );
    resources.insert(
        "staffSectionAssociations".into(),
        resource(
            "StaffSectionAssociation",
            &[
                "$.sectionReference.localCourseCode",
                "$.sectionReference.schoolId",
                "$.sectionReference.schoolYear",
                "$.sectionReference.sectionIdentifier",
                "$.sectionReference.sessionName",
                "$.staffReference.staffUniqueId",
            ],
            &[
                ("Section", section_reference(true)),
                ("Staff", staff_reference(true)),
            ],
        ),
    );
    resources.insert(
        "contacts".into(),
        resource("Contact", &["$.contactUniqueId"], &[]),
    );
    resources.insert(
        "studentContactAssociations".into(),
        resource(
            "StudentContactAssociation",
            &[
                "$.contactReference.contactUniqueId",
                "$.studentReference.studentUniqueId",
            ],
            &[
                (
                    "Contact",
                    reference(
                        "Contact",
                        true,
                        &[("$.contactUniqueId", "$.contactReference.contactUniqueId")],
                    ),
                ),
                ("Student", student_reference(true)),
            ],
        ),
    );

    json!({
        "projectSchema": {
            "projectName": "Ed-Fi",
            "projectVersion": "5.0.0",
            "projectEndpointName": "ed-fi",
            "isExtensionProject": false,
            "abstractResources": {
                "EducationOrganization": { "identityJsonPaths": ["$.educationOrganizationId"] }
            },
            "resourceSchemas": Value::Object(resources)
        }
    })
}

/// An extension project with one new resource and one resource extension.
pub fn extension_schema_json() -> Value {
    json!({
        "projectSchema": {
            "projectName": "Sample",
            "projectVersion": "1.0.0",
            "projectEndpointName": "sample",
            "isExtensionProject": true,
            "resourceSchemas": {
                "busRoutes": {
                    "resourceName": "BusRoute",
                    "identityJsonPaths": ["$.busRouteNumber", "$.schoolReference.schoolId"],
                    "documentPathsMapping": {
                        "School": reference_in(
                            "Ed-Fi",
                            "School",
                            true,
                            &[("$.schoolId", "$.schoolReference.schoolId")]
                        )
                    }
                },
                "schools": {
                    "resourceName": "School",
                    "isResourceExtension": true,
                    "identityJsonPaths": [],
                    "documentPathsMapping": {}
                }
            }
        }
    })
}

pub fn api_schema() -> ApiSchemaDocuments {
    ApiSchemaDocuments::from_json(&core_schema_json(), &[extension_schema_json()])
        .expect("fixture schema is valid")
}

pub fn core_only_schema() -> ApiSchemaDocuments {
    ApiSchemaDocuments::from_json(&core_schema_json(), &[]).expect("fixture schema is valid")
}
