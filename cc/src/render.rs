//! Template assembly from task descriptors
//!
//! Translates finalized [`TaskDescriptor`]s into one CloudFormation
//! template: the root document every family writes into. Rendering is
//! all-or-nothing; callers only write files after every family rendered.

use chrono::Utc;
use serde_json::{Value, json};

use cfndoc::{Output, Parameter, Resource, Template, intrinsics};

use crate::compose::{Healthcheck, PortMapping};
use crate::error::Result;
use crate::family::descriptor::{ContainerDefinition, TaskDescriptor};
use crate::family::network::{AwsSourceType, IngressSource};
use crate::family::sidecars::FIRELENS_CONTAINER_NAME;
use crate::resources::RoleProvider;

/// Template parameter: VPC the security groups attach to
pub const PARAM_VPC_ID: &str = "VpcId";
/// Template parameter: subnets the service ENIs land in
pub const PARAM_SUBNET_IDS: &str = "SubnetIds";
/// Template parameter: target ECS cluster
pub const PARAM_CLUSTER_NAME: &str = "ClusterName";

/// Managed policy every execution role carries
const ECS_EXECUTION_BASE_POLICY: &str = "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";

/// Render all families into one root template
pub fn render_project(description: &str, descriptors: &[TaskDescriptor]) -> Result<Template> {
    let mut template = Template::new(description);
    template.set_metadata("GeneratedBy", json!("composecfn"));
    template.set_metadata("GeneratedAt", json!(Utc::now().to_rfc3339()));

    template.add_parameter(
        PARAM_VPC_ID,
        Parameter::new("AWS::EC2::VPC::Id").with_description("VPC for the service security groups"),
    )?;
    template.add_parameter(
        PARAM_SUBNET_IDS,
        Parameter::new("List<AWS::EC2::Subnet::Id>").with_description("Subnets for the service ENIs"),
    )?;
    template.add_parameter(
        PARAM_CLUSTER_NAME,
        Parameter::new("String")
            .with_description("Target ECS cluster")
            .with_default(json!("default")),
    )?;

    for descriptor in descriptors {
        render_family(&mut template, descriptor)?;
    }
    Ok(template)
}

/// Render one family's resources into the shared template
fn render_family(template: &mut Template, descriptor: &TaskDescriptor) -> Result<()> {
    let prefix = &descriptor.logical_name;

    render_log_group(template, descriptor)?;
    render_roles(template, descriptor)?;
    render_security_group(template, descriptor)?;
    render_task_definition(template, descriptor)?;
    render_service(template, descriptor)?;
    render_scaling(template, descriptor)?;

    template.add_output(
        format!("{prefix}ServiceName"),
        Output::new(intrinsics::get_att(&format!("{prefix}Service"), "Name"))
            .exported_as(intrinsics::sub(&format!("${{AWS::StackName}}-{prefix}Service"))),
    )?;
    Ok(())
}

fn render_log_group(template: &mut Template, descriptor: &TaskDescriptor) -> Result<()> {
    template.add_resource(
        format!("{}LogGroup", descriptor.logical_name),
        Resource::new("AWS::Logs::LogGroup").with_properties(json!({
            "LogGroupName": format!("/ecs/{}", descriptor.family_name),
            "RetentionInDays": descriptor.log_retention_days,
        })),
    )?;
    Ok(())
}

fn render_roles(template: &mut Template, descriptor: &TaskDescriptor) -> Result<()> {
    let assume = json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ecs-tasks.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }]
    });

    let mut exec_managed: Vec<Value> = vec![json!(ECS_EXECUTION_BASE_POLICY)];
    exec_managed.extend(descriptor.iam.execution.managed_policy_arns.iter().map(|a| json!(a)));

    let mut exec_props = json!({
        "AssumeRolePolicyDocument": assume,
        "ManagedPolicyArns": exec_managed,
    });
    let task_managed: Vec<Value> = descriptor.iam.task.managed_policy_arns.iter().map(|a| json!(a)).collect();
    let mut task_props = json!({
        "AssumeRolePolicyDocument": assume,
        "ManagedPolicyArns": task_managed,
    });

    if let Some(boundary) = &descriptor.iam.permissions_boundary {
        exec_props["PermissionsBoundary"] = json!(boundary);
        task_props["PermissionsBoundary"] = json!(boundary);
    }

    template.add_resource(
        &descriptor.execution_role.logical_id,
        Resource::new("AWS::IAM::Role").with_properties(exec_props),
    )?;
    template.add_resource(
        &descriptor.task_role.logical_id,
        Resource::new("AWS::IAM::Role").with_properties(task_props),
    )?;

    for policy in &descriptor.policies {
        let role_id = match policy.role {
            crate::family::RoleKind::Execution => &descriptor.execution_role.logical_id,
            crate::family::RoleKind::Task => &descriptor.task_role.logical_id,
        };
        template.add_resource(
            &policy.logical_id,
            Resource::new("AWS::IAM::Policy").with_properties(json!({
                "PolicyName": policy.name,
                "PolicyDocument": policy.document,
                "Roles": [intrinsics::r#ref(role_id)],
            })),
        )?;
    }
    Ok(())
}

fn render_security_group(template: &mut Template, descriptor: &TaskDescriptor) -> Result<()> {
    let prefix = &descriptor.logical_name;
    let sg_id = format!("{prefix}SecurityGroup");

    template.add_resource(
        &sg_id,
        Resource::new("AWS::EC2::SecurityGroup").with_properties(json!({
            "GroupDescription": format!("Ingress for ECS family {}", descriptor.family_name),
            "VpcId": intrinsics::r#ref(PARAM_VPC_ID),
        })),
    )?;

    for (index, rule) in descriptor.ingress_rules.iter().enumerate() {
        let mut properties = json!({
            "GroupId": intrinsics::get_att(&sg_id, "GroupId"),
            "IpProtocol": rule.port.protocol.to_string(),
            "FromPort": rule.port.published,
            "ToPort": rule.port.published,
        });

        match &rule.source {
            IngressSource::SelfIngress => {
                properties["SourceSecurityGroupId"] = intrinsics::get_att(&sg_id, "GroupId");
                properties["Description"] = json!(format!("{} self ingress", descriptor.family_name));
            }
            IngressSource::External { cidr, description } => {
                let key = if cidr.contains(':') { "CidrIpv6" } else { "CidrIp" };
                properties[key] = json!(cidr);
                properties["Description"] = json!(
                    description
                        .clone()
                        .unwrap_or_else(|| format!("{} from {cidr}", descriptor.family_name))
                );
            }
            IngressSource::Aws {
                source_type,
                id,
                description,
            } => {
                let key = match source_type {
                    AwsSourceType::SecurityGroup => "SourceSecurityGroupId",
                    AwsSourceType::PrefixList => "SourcePrefixListId",
                };
                properties[key] = json!(id);
                properties["Description"] =
                    json!(description.clone().unwrap_or_else(|| format!("{} from {id}", descriptor.family_name)));
            }
        }

        template.add_resource(
            format!("{prefix}Ingress{index}"),
            Resource::new("AWS::EC2::SecurityGroupIngress").with_properties(properties),
        )?;
    }
    Ok(())
}

fn render_task_definition(template: &mut Template, descriptor: &TaskDescriptor) -> Result<()> {
    let prefix = &descriptor.logical_name;

    let containers: Vec<Value> = descriptor
        .containers
        .iter()
        .map(|c| container_definition_json(descriptor, c))
        .collect();

    let volumes: Vec<Value> = descriptor.volumes.iter().map(|name| json!({ "Name": name })).collect();

    let mut properties = json!({
        "Family": descriptor.family_name,
        "Cpu": descriptor.task_cpu.to_string(),
        "Memory": descriptor.task_ram_mb.to_string(),
        "NetworkMode": descriptor.network_mode,
        "RequiresCompatibilities": [descriptor.launch_type.to_string()],
        "ExecutionRoleArn": descriptor.execution_role.arn(),
        "TaskRoleArn": descriptor.task_role.arn(),
        "ContainerDefinitions": containers,
    });
    if !volumes.is_empty() {
        properties["Volumes"] = json!(volumes);
    }
    if descriptor.cpu_arch.is_some() || descriptor.os_family.is_some() {
        let mut platform = json!({});
        if let Some(arch) = descriptor.cpu_arch {
            platform["CpuArchitecture"] = json!(arch.to_string());
        }
        if let Some(os) = descriptor.os_family {
            platform["OperatingSystemFamily"] = json!(os.to_string());
        }
        properties["RuntimePlatform"] = platform;
    }

    template.add_resource(
        format!("{prefix}TaskDef"),
        Resource::new("AWS::ECS::TaskDefinition").with_properties(properties),
    )?;
    Ok(())
}

fn container_definition_json(descriptor: &TaskDescriptor, container: &ContainerDefinition) -> Value {
    let mut definition = json!({
        "Name": container.name,
        "Image": container.image,
        "Essential": container.essential,
    });

    if let Some(cpu) = container.cpu {
        definition["Cpu"] = json!(cpu);
    }
    if let Some(memory) = container.memory {
        definition["Memory"] = json!(memory);
    }
    if let Some(reservation) = container.memory_reservation {
        definition["MemoryReservation"] = json!(reservation);
    }
    if let Some(command) = &container.command {
        definition["Command"] = json!(command);
    }

    if !container.port_mappings.is_empty() {
        definition["PortMappings"] = json!(container.port_mappings.iter().map(port_mapping_json).collect::<Vec<_>>());
    }

    if !container.environment.is_empty() {
        definition["Environment"] = json!(
            container
                .environment
                .iter()
                .map(|(name, value)| json!({ "Name": name, "Value": value }))
                .collect::<Vec<_>>()
        );
    }

    if !container.secrets.is_empty() {
        definition["Secrets"] = json!(
            container
                .secrets
                .iter()
                .map(|s| json!({ "Name": s.name, "ValueFrom": s.value_from }))
                .collect::<Vec<_>>()
        );
    }

    if !container.depends_on.is_empty() {
        definition["DependsOn"] = json!(
            container
                .depends_on
                .iter()
                .map(|d| json!({ "ContainerName": d.container_name, "Condition": d.condition.to_string() }))
                .collect::<Vec<_>>()
        );
    }

    if let Some(check) = &container.healthcheck {
        definition["HealthCheck"] = healthcheck_json(check);
    }

    if !container.ulimits.is_empty() {
        definition["Ulimits"] = json!(
            container
                .ulimits
                .iter()
                .map(|u| json!({ "Name": u.name, "SoftLimit": u.soft, "HardLimit": u.hard }))
                .collect::<Vec<_>>()
        );
    }

    if !container.mount_points.is_empty() {
        definition["MountPoints"] = json!(
            container
                .mount_points
                .iter()
                .map(|m| json!({
                    "SourceVolume": m.source,
                    "ContainerPath": m.target,
                    "ReadOnly": m.read_only,
                }))
                .collect::<Vec<_>>()
        );
    }

    definition["LogConfiguration"] = log_configuration_json(descriptor, container);

    // The log router carries the FireLens marker itself
    if container.name == FIRELENS_CONTAINER_NAME {
        definition["FirelensConfiguration"] = json!({ "Type": "fluentbit" });
    }

    definition
}

fn port_mapping_json(port: &PortMapping) -> Value {
    // awsvpc networking: host port always equals container port
    json!({
        "ContainerPort": port.target,
        "HostPort": port.target,
        "Protocol": port.protocol.to_string(),
    })
}

fn healthcheck_json(check: &Healthcheck) -> Value {
    json!({
        "Command": check.command,
        "Interval": check.interval,
        "Timeout": check.timeout,
        "Retries": check.retries,
        "StartPeriod": check.start_period,
    })
}

fn log_configuration_json(descriptor: &TaskDescriptor, container: &ContainerDefinition) -> Value {
    match container.log_driver.as_deref() {
        Some("awsfirelens") => {
            let options: Value = container
                .log_options
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect::<serde_json::Map<_, _>>()
                .into();
            json!({ "LogDriver": "awsfirelens", "Options": options })
        }
        // Everything else, including compose drivers with no AWS
        // counterpart (json-file), lands on awslogs
        _ => json!({
            "LogDriver": "awslogs",
            "Options": {
                "awslogs-group": intrinsics::r#ref(&format!("{}LogGroup", descriptor.logical_name)),
                "awslogs-region": intrinsics::r#ref("AWS::Region"),
                "awslogs-stream-prefix": container.name,
            }
        }),
    }
}

fn render_service(template: &mut Template, descriptor: &TaskDescriptor) -> Result<()> {
    let prefix = &descriptor.logical_name;
    let assign_public_ip = if descriptor.assign_public_ip { "ENABLED" } else { "DISABLED" };

    let mut properties = json!({
        "Cluster": intrinsics::r#ref(PARAM_CLUSTER_NAME),
        "DesiredCount": descriptor.replicas,
        "LaunchType": descriptor.launch_type.to_string(),
        "TaskDefinition": intrinsics::r#ref(&format!("{prefix}TaskDef")),
        "PropagateTags": "SERVICE",
        "NetworkConfiguration": {
            "AwsvpcConfiguration": {
                "AssignPublicIp": assign_public_ip,
                "Subnets": intrinsics::r#ref(PARAM_SUBNET_IDS),
                "SecurityGroups": [intrinsics::get_att(&format!("{prefix}SecurityGroup"), "GroupId")],
            }
        },
    });

    if let Some(parallelism) = descriptor.update_parallelism {
        // parallelism extra replicas during a rolling update, as a percent
        // of the desired count on top of the 100% baseline
        let replicas = descriptor.replicas.max(1);
        let maximum_percent = 100 + (100 * parallelism.min(replicas)) / replicas;
        properties["DeploymentConfiguration"] = json!({
            "MaximumPercent": maximum_percent,
            "MinimumHealthyPercent": 100,
        });
    }

    // The service must wait for every IAM policy generated for the family,
    // plus the services of the families it depends on
    let mut resource = Resource::new("AWS::ECS::Service")
        .with_properties(properties)
        .with_depends_on(descriptor.service_depends_on.iter().cloned());
    for family in &descriptor.cross_family_depends {
        resource.add_depends_on(format!("{}Service", cfndoc::logical_id(family)));
    }

    template.add_resource(format!("{prefix}Service"), resource)?;
    Ok(())
}

fn render_scaling(template: &mut Template, descriptor: &TaskDescriptor) -> Result<()> {
    let Some(scaling) = &descriptor.scaling else {
        return Ok(());
    };
    let prefix = &descriptor.logical_name;

    let mut target_props = json!({
        "MinCapacity": scaling.min_replicas,
        "MaxCapacity": scaling.max_replicas,
        "ServiceNamespace": "ecs",
        "ScalableDimension": "ecs:service:DesiredCount",
        "ResourceId": intrinsics::sub(&format!(
            "service/${{{PARAM_CLUSTER_NAME}}}/${{{prefix}Service.Name}}"
        )),
        "RoleARN": intrinsics::sub(
            "arn:aws:iam::${AWS::AccountId}:role/aws-service-role/ecs.application-autoscaling.amazonaws.com/AWSServiceRoleForApplicationAutoScaling_ECSService"
        ),
    });

    if !scaling.scheduled.is_empty() {
        target_props["ScheduledActions"] = json!(
            scaling
                .scheduled
                .iter()
                .map(|action| json!({
                    "ScheduledActionName": action.name,
                    "Schedule": action.schedule,
                    "ScalableTargetAction": { "MinCapacity": action.min, "MaxCapacity": action.max },
                }))
                .collect::<Vec<_>>()
        );
    }

    template.add_resource(
        format!("{prefix}ScalableTarget"),
        Resource::new("AWS::ApplicationAutoScaling::ScalableTarget").with_properties(target_props),
    )?;

    for (metric, target, suffix) in [
        ("ECSServiceAverageCPUUtilization", scaling.cpu_target, "Cpu"),
        ("ECSServiceAverageMemoryUtilization", scaling.memory_target, "Memory"),
    ] {
        let Some(target_value) = target else { continue };
        template.add_resource(
            format!("{prefix}{suffix}ScalingPolicy"),
            Resource::new("AWS::ApplicationAutoScaling::ScalingPolicy").with_properties(json!({
                "PolicyName": format!("{}-{}", descriptor.family_name, suffix.to_lowercase()),
                "PolicyType": "TargetTrackingScaling",
                "ScalingTargetId": intrinsics::r#ref(&format!("{prefix}ScalableTarget")),
                "TargetTrackingScalingPolicyConfiguration": {
                    "PredefinedMetricSpecification": { "PredefinedMetricType": metric },
                    "TargetValue": target_value,
                },
            })),
        )?;
    }
    Ok(())
}
